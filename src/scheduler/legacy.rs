//! Adapter for the per-asset `schedule_cron` field that predates scheduled tasks.
//! An asset fires through this path only while it has no active task.

use std::collections::HashSet;

use chrono::DateTime;
use chrono_tz::Tz;
use tracing::warn;

use super::cron::CronSchedule;
use crate::db::models::Asset;

/// Assets whose legacy cron has an occurrence in `(since, now]` and that no
/// active task covers.
pub fn due_assets<'a>(
    assets: &'a [Asset],
    tasked: &HashSet<i64>,
    since: &DateTime<Tz>,
    now: &DateTime<Tz>,
) -> Vec<&'a Asset> {
    assets
        .iter()
        .filter(|a| !tasked.contains(&a.id))
        .filter(|a| {
            let Some(expr) = a.schedule_cron.as_deref() else {
                return false;
            };
            match CronSchedule::parse(expr) {
                Ok(cron) => cron.is_due(since, now),
                Err(e) => {
                    warn!(asset_id = a.id, error = %e, "Skipping asset with unparseable legacy schedule");
                    false
                }
            }
        })
        .collect()
}
