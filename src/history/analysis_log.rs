use sqlx::{Executor, Sqlite};
use tracing::debug;

use crate::db::models::{AnalysisRecord, AnalysisSummary, Page};
use crate::db::PageRequest;
use crate::error::{AppError, Result};
use crate::types::{Conclusion, Cycle, Direction};

const SUMMARY_COLUMNS: &str = "id, asset, cycle, timestamp, trend, confidence, conclusion, direction, \
                               summary, rationale, risk_reward_ratio, entry_point, stop_loss, \
                               take_profit_1, take_profit_2, wave_analysis_4h, wave_analysis_1h, \
                               wave_analysis_15m, prompt_version_id, task_id";

/// A completed, normalized engine verdict ready to be appended.
#[derive(Debug, Clone)]
pub struct NewAnalysisRecord {
    pub asset: String,
    pub cycle: Cycle,
    pub timestamp: i64,
    pub conclusion: Conclusion,
    pub detail: RecordDetail,
    pub prompt_version_id: i64,
    pub task_id: Option<i64>,
    /// Engine reply exactly as received.
    pub raw_response: String,
}

/// Optional verdict fields kept on every record, whatever the conclusion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDetail {
    pub trend: Option<String>,
    pub confidence: Option<f64>,
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
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub asset: Option<String>,
}

/// Append-only record of every successful pipeline pass.
/// Rows are never updated or deleted.
#[derive(Clone)]
pub struct AnalysisLog {
    pool: sqlx::SqlitePool,
}

impl AnalysisLog {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one record through `exec`, so the caller can pair it with
    /// other writes in a transaction.
    pub(crate) async fn append<'e, E>(&self, exec: E, rec: &NewAnalysisRecord) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let d = &rec.detail;
        let id = sqlx::query(
            r#"
            INSERT INTO analysis_records (
                asset, cycle, timestamp, trend, confidence, conclusion, direction,
                summary, rationale, risk_reward_ratio, entry_point, stop_loss,
                take_profit_1, take_profit_2, wave_analysis_4h, wave_analysis_1h,
                wave_analysis_15m, prompt_version_id, task_id, raw_response
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rec.asset)
        .bind(rec.cycle)
        .bind(rec.timestamp)
        .bind(&d.trend)
        .bind(d.confidence)
        .bind(rec.conclusion)
        .bind(d.direction)
        .bind(&d.summary)
        .bind(&d.rationale)
        .bind(d.risk_reward_ratio)
        .bind(d.entry_point)
        .bind(d.stop_loss)
        .bind(d.take_profit_1)
        .bind(d.take_profit_2)
        .bind(&d.wave_analysis_4h)
        .bind(&d.wave_analysis_1h)
        .bind(&d.wave_analysis_15m)
        .bind(rec.prompt_version_id)
        .bind(rec.task_id)
        .bind(&rec.raw_response)
        .execute(exec)
        .await?
        .last_insert_rowid();

        debug!(analysis_id = id, asset = %rec.asset, cycle = %rec.cycle, "Analysis record appended");
        Ok(id)
    }

    /// Newest first. A page past the end yields empty `data`, not an error.
    pub async fn list(&self, filter: &HistoryFilter, req: PageRequest) -> Result<Page<AnalysisSummary>> {
        let asset = filter
            .asset
            .as_deref()
            .map(|a| a.trim().to_ascii_uppercase())
            .filter(|a| !a.is_empty());

        let (total, rows) = match &asset {
            Some(asset) => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_records WHERE asset = ?")
                    .bind(asset)
                    .fetch_one(&self.pool)
                    .await?;
                let rows = sqlx::query_as::<_, AnalysisSummary>(&format!(
                    "SELECT {SUMMARY_COLUMNS} FROM analysis_records WHERE asset = ? \
                     ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
                ))
                .bind(asset)
                .bind(req.limit())
                .bind(req.offset())
                .fetch_all(&self.pool)
                .await?;
                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_records")
                    .fetch_one(&self.pool)
                    .await?;
                let rows = sqlx::query_as::<_, AnalysisSummary>(&format!(
                    "SELECT {SUMMARY_COLUMNS} FROM analysis_records \
                     ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
                ))
                .bind(req.limit())
                .bind(req.offset())
                .fetch_all(&self.pool)
                .await?;
                (total, rows)
            }
        };

        Ok(Page::new(rows, req, total))
    }

    /// Full record including the raw engine response.
    pub async fn get(&self, id: i64) -> Result<AnalysisRecord> {
        sqlx::query_as::<_, AnalysisRecord>(&format!(
            "SELECT {SUMMARY_COLUMNS}, raw_response FROM analysis_records WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("analysis record {id}")))
    }
}
