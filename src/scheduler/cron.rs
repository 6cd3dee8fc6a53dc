use chrono::{DateTime, TimeZone};
use croner::Cron;

use crate::error::{AppError, Result};

/// Parsed five-field crontab expression (minute hour day-of-month month day-of-week).
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(AppError::Validation("cron expression must not be empty".to_string()));
        }
        let cron = Cron::new(expr)
            .parse()
            .map_err(|e| AppError::Validation(format!("invalid cron expression '{expr}': {e}")))?;
        Ok(Self { expr: expr.to_string(), cron })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First occurrence strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.cron.find_next_occurrence(after, false).ok()
    }

    /// Whether an occurrence falls in `(since, now]`. A window spanning several
    /// occurrences still reports a single fire.
    pub fn is_due<Tz: TimeZone>(&self, since: &DateTime<Tz>, now: &DateTime<Tz>) -> bool {
        match self.next_after(since) {
            Some(next) => next <= *now,
            None => false,
        }
    }
}

/// Validate an optional expression, treating blank as "no schedule".
pub fn normalize_optional(expr: Option<&str>) -> Result<Option<String>> {
    match expr.map(str::trim).filter(|e| !e.is_empty()) {
        Some(e) => Ok(Some(CronSchedule::parse(e)?.expr().to_string())),
        None => Ok(None),
    }
}
