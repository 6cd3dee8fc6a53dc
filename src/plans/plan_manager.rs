use sqlx::{Executor, Sqlite};
use tracing::{info, warn};

use crate::db::{self, models::Page, models::TradePlan, PageRequest};
use crate::error::{AppError, Result};
use crate::types::{Cycle, Direction, PlanStatus};

const SELECT_PLAN: &str = "SELECT id, analysis_id, asset, cycle, direction, entry_price, stop_loss, \
                           take_profit_1, take_profit_2, status, created_at, updated_at FROM trade_plans";

/// Price levels lifted from an `OPEN_POSITION` verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanLevels {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: Option<f64>,
}

/// Owns `trade_plans.status`. Every transition is checked against the
/// lifecycle graph and applied with a compare-and-swap on the current status.
#[derive(Clone)]
pub struct PlanManager {
    pool: sqlx::SqlitePool,
}

impl PlanManager {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a PENDING plan through `exec` and return its id.
    pub(crate) async fn create_from_analysis<'e, E>(
        &self,
        exec: E,
        analysis_id: i64,
        asset: &str,
        cycle: Cycle,
        levels: &PlanLevels,
    ) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = db::now_ms();
        let id = sqlx::query(
            r#"
            INSERT INTO trade_plans (
                analysis_id, asset, cycle, direction, entry_price, stop_loss,
                take_profit_1, take_profit_2, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(analysis_id)
        .bind(asset)
        .bind(cycle)
        .bind(levels.direction)
        .bind(levels.entry_price)
        .bind(levels.stop_loss)
        .bind(levels.take_profit_1)
        .bind(levels.take_profit_2)
        .bind(PlanStatus::Pending)
        .bind(now)
        .bind(now)
        .execute(exec)
        .await?
        .last_insert_rowid();

        info!(
            plan_id = id,
            analysis_id,
            asset,
            cycle = %cycle,
            direction = %levels.direction,
            entry = levels.entry_price,
            "Trade plan created"
        );
        Ok(id)
    }

    /// Move a plan along one lifecycle edge.
    ///
    /// The UPDATE only matches while the row still holds the status we read,
    /// so of two racing transitions from the same state exactly one lands.
    /// The loser re-reads and is judged against the new status.
    pub async fn update_status(&self, id: i64, next: PlanStatus) -> Result<TradePlan> {
        loop {
            let current = self.get(id).await?;
            if !current.status.can_transition_to(next) {
                return Err(AppError::InvalidTransition { from: current.status, to: next });
            }

            let swapped = sqlx::query(
                "UPDATE trade_plans SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(next)
            .bind(db::now_ms())
            .bind(id)
            .bind(current.status)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if swapped == 1 {
                info!(
                    plan_id = id,
                    from = %current.status,
                    to = %next,
                    terminal = next.is_terminal(),
                    "Trade plan status changed"
                );
                return self.get(id).await;
            }
            warn!(plan_id = id, expected = %current.status, "Plan status changed concurrently, re-checking");
        }
    }

    pub async fn get(&self, id: i64) -> Result<TradePlan> {
        sqlx::query_as::<_, TradePlan>(&format!("{SELECT_PLAN} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan {id}")))
    }

    pub async fn list(&self, req: PageRequest) -> Result<Page<TradePlan>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trade_plans")
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query_as::<_, TradePlan>(&format!(
            "{SELECT_PLAN} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(req.limit())
        .bind(req.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(rows, req, total))
    }
}
