/// Row types matching `migrations/0001_init.sql`.
/// Timestamps are Unix epoch milliseconds.
use serde::Serialize;

use crate::types::{AssetType, Conclusion, Cycle, Direction, PlanStatus};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Asset {
    pub id: i64,
    pub symbol: String,
    #[sqlx(try_from = "i64")]
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// Legacy single-cron schedule; superseded by scheduled tasks.
    pub schedule_cron: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PromptVersion {
    pub id: i64,
    pub name: String,
    pub version: i64,
    pub content: String,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScheduledTask {
    pub id: i64,
    pub asset_id: i64,
    pub prompt_id: i64,
    pub cycle: Cycle,
    pub cron_expression: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Full analysis record, raw engine response included. Audit view only.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AnalysisRecord {
    pub id: i64,
    pub asset: String,
    pub cycle: Cycle,
    pub timestamp: i64,
    pub trend: Option<String>,
    pub confidence: Option<f64>,
    pub conclusion: Conclusion,
    pub direction: Option<Direction>,
    pub summary: Option<String>,
    pub rationale: Option<String>,
    pub risk_reward_ratio: Option<f64>,
    pub entry_point: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit_1: Option<f64>,
    pub take_profit_2: Option<f64>,
    pub wave_analysis_4h: Option<String>,
    pub wave_analysis_1h: Option<String>,
    pub wave_analysis_15m: Option<String>,
    pub prompt_version_id: i64,
    pub task_id: Option<i64>,
    pub raw_response: String,
}

/// Default projection of an analysis record (no raw response).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AnalysisSummary {
    pub id: i64,
    pub asset: String,
    pub cycle: Cycle,
    pub timestamp: i64,
    pub trend: Option<String>,
    pub confidence: Option<f64>,
    pub conclusion: Conclusion,
    pub direction: Option<Direction>,
    pub summary: Option<String>,
    pub rationale: Option<String>,
    pub risk_reward_ratio: Option<f64>,
    pub entry_point: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit_1: Option<f64>,
    pub take_profit_2: Option<f64>,
    pub wave_analysis_4h: Option<String>,
    pub wave_analysis_1h: Option<String>,
    pub wave_analysis_15m: Option<String>,
    pub prompt_version_id: i64,
    pub task_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TradePlan {
    pub id: i64,
    pub analysis_id: i64,
    pub asset: String,
    pub cycle: Cycle,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: Option<f64>,
    pub status: PlanStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One page of a paginated listing. `page` is 1-indexed.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: i64,
    pub total_records: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, req: crate::db::PageRequest, total_records: i64) -> Self {
        Self {
            data,
            page: req.page,
            page_size: req.page_size,
            total_pages: crate::db::total_pages(total_records, req.page_size),
            total_records,
        }
    }
}
