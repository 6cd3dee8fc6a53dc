use std::str::FromStr;

use chrono_tz::Tz;

use crate::error::{AppError, Result};
use crate::types::Cycle;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_MODEL: &str = "gpt-4-turbo";

/// Scheduler tick interval (seconds). Cron expressions have minute precision.
pub const SCHEDULER_TICK_SECS: u64 = 60;

/// Wall-clock budget for one analysis engine call, retries included (seconds).
pub const ENGINE_TIMEOUT_SECS: u64 = 180;

/// Transport retries inside one engine call. Runs themselves are never retried.
pub const ENGINE_MAX_RETRIES: u32 = 2;

/// Concurrent pipeline passes across all asset/cycle pairs.
pub const WORKER_POOL_SIZE: usize = 4;

/// Klines requested per interval when building market context.
pub const KLINE_LIMIT: u32 = 100;

/// Intervals fetched for market context, lowest timeframe first.
pub const KLINE_INTERVALS: &[&str] = &["15m", "1h", "4h"];

/// Page size bounds for paginated list endpoints.
pub mod paging {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 100;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Shared bearer key (APP_LOGIN_SECRET_KEY). None disables route auth and /verify-key.
    pub login_secret: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    /// Comma-separated list allowed; the first entry is tried first (OPENAI_MODEL).
    pub openai_model: String,
    /// Kline REST endpoint for market context. Empty disables context fetching.
    pub kline_api_base_url: String,
    pub kline_api_secret: Option<String>,
    pub scheduler_tick_secs: u64,
    /// Time zone cron expressions are evaluated in (SCHEDULER_TZ, IANA name).
    pub scheduler_tz: Tz,
    pub engine_timeout_secs: u64,
    pub engine_max_retries: u32,
    pub worker_pool_size: usize,
    /// Prompt name whose active version serves manual and legacy runs (DEFAULT_PROMPT_NAME).
    pub default_prompt_name: String,
    /// Cycle assigned to runs fired by the legacy per-asset cron field (LEGACY_CYCLE).
    pub legacy_cycle: Cycle,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "analyst.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            login_secret: non_empty_var("APP_LOGIN_SECRET_KEY"),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| OPENAI_BASE_URL.to_string()),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| OPENAI_MODEL.to_string()),
            kline_api_base_url: std::env::var("KLINE_API_BASE_URL").unwrap_or_default(),
            kline_api_secret: non_empty_var("KLINE_API_SECRET_KEY"),
            scheduler_tick_secs: parse_var("SCHEDULER_TICK_SECS", SCHEDULER_TICK_SECS)?,
            scheduler_tz: match non_empty_var("SCHEDULER_TZ") {
                Some(name) => Tz::from_str(&name)
                    .map_err(|_| AppError::Config(format!("SCHEDULER_TZ '{name}' is not a known time zone")))?,
                None => Tz::UTC,
            },
            engine_timeout_secs: at_least_one(
                "ENGINE_TIMEOUT_SECS",
                parse_var("ENGINE_TIMEOUT_SECS", ENGINE_TIMEOUT_SECS)?,
            )?,
            engine_max_retries: parse_var("ENGINE_MAX_RETRIES", ENGINE_MAX_RETRIES)?,
            worker_pool_size: parse_var("WORKER_POOL_SIZE", WORKER_POOL_SIZE)?.max(1),
            default_prompt_name: std::env::var("DEFAULT_PROMPT_NAME")
                .unwrap_or_else(|_| "market-analysis".to_string()),
            legacy_cycle: match non_empty_var("LEGACY_CYCLE") {
                Some(raw) => raw
                    .parse::<Cycle>()
                    .map_err(|e| AppError::Config(format!("LEGACY_CYCLE: {e}")))?,
                None => Cycle::H1,
            },
        })
    }

    pub fn model_candidates(&self) -> Vec<String> {
        self.openai_model
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match non_empty_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

/// A zero timeout would fail every engine call immediately.
fn at_least_one(key: &str, secs: u64) -> Result<u64> {
    if secs == 0 {
        return Err(AppError::Config(format!("{key} must be at least 1 second")));
    }
    Ok(secs)
}

#[cfg(test)]
impl Config {
    /// Defaults without touching the process environment.
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            login_secret: None,
            openai_api_key: None,
            openai_base_url: OPENAI_BASE_URL.to_string(),
            openai_model: OPENAI_MODEL.to_string(),
            kline_api_base_url: String::new(),
            kline_api_secret: None,
            scheduler_tick_secs: SCHEDULER_TICK_SECS,
            scheduler_tz: Tz::UTC,
            engine_timeout_secs: 5,
            engine_max_retries: 0,
            worker_pool_size: WORKER_POOL_SIZE,
            default_prompt_name: "market-analysis".to_string(),
            legacy_cycle: Cycle::H1,
        }
    }
}
