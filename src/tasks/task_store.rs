use serde::Deserialize;
use tracing::info;

use crate::db::{self, models::ScheduledTask};
use crate::error::{AppError, Result};
use crate::scheduler::cron::CronSchedule;
use crate::types::Cycle;

const SELECT_TASK: &str = "SELECT id, asset_id, prompt_id, cycle, cron_expression, is_active, \
                           created_at, updated_at FROM scheduled_tasks";

/// Operator-supplied task definition, used for both create and full update.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub asset_id: i64,
    pub prompt_id: i64,
    pub cycle: Cycle,
    pub cron_expression: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Scheduled-task definitions (asset × cycle × prompt version × cron × enabled).
#[derive(Clone)]
pub struct TaskStore {
    pool: sqlx::SqlitePool,
}

impl TaskStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, spec: &TaskSpec) -> Result<ScheduledTask> {
        let cron = self.validate(spec).await?;
        let now = db::now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_tasks
                (asset_id, prompt_id, cycle, cron_expression, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(spec.asset_id)
        .bind(spec.prompt_id)
        .bind(spec.cycle)
        .bind(cron.expr())
        .bind(spec.is_active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let task = self.get(result.last_insert_rowid()).await?;
        info!(
            task_id = task.id,
            asset_id = task.asset_id,
            cycle = %task.cycle,
            cron = %task.cron_expression,
            "Scheduled task created"
        );
        Ok(task)
    }

    pub async fn update(&self, id: i64, spec: &TaskSpec) -> Result<ScheduledTask> {
        let cron = self.validate(spec).await?;
        let updated = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET asset_id = ?, prompt_id = ?, cycle = ?, cron_expression = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(spec.asset_id)
        .bind(spec.prompt_id)
        .bind(spec.cycle)
        .bind(cron.expr())
        .bind(spec.is_active)
        .bind(db::now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(AppError::NotFound(format!("task {id}")));
        }
        info!(task_id = id, "Scheduled task updated");
        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(AppError::NotFound(format!("task {id}")));
        }
        info!(task_id = id, "Scheduled task deleted");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<ScheduledTask> {
        sqlx::query_as::<_, ScheduledTask>(&format!("{SELECT_TASK} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {id}")))
    }

    pub async fn list(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query_as::<_, ScheduledTask>(&format!("{SELECT_TASK} ORDER BY id DESC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Enabled tasks, oldest first. Read by the scheduler every tick.
    pub async fn list_active(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query_as::<_, ScheduledTask>(&format!(
            "{SELECT_TASK} WHERE is_active = 1 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Enabled task for an asset/cycle pair, if any. Lowest id wins.
    pub async fn active_for(&self, asset_id: i64, cycle: Cycle) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query_as::<_, ScheduledTask>(&format!(
            "{SELECT_TASK} WHERE is_active = 1 AND asset_id = ? AND cycle = ? ORDER BY id ASC LIMIT 1"
        ))
        .bind(asset_id)
        .bind(cycle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn validate(&self, spec: &TaskSpec) -> Result<CronSchedule> {
        let cron = CronSchedule::parse(&spec.cron_expression)?;

        let asset_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM assets WHERE id = ?")
            .bind(spec.asset_id)
            .fetch_optional(&self.pool)
            .await?;
        if asset_exists.is_none() {
            return Err(AppError::NotFound(format!("asset {}", spec.asset_id)));
        }

        let prompt_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM prompts WHERE id = ?")
            .bind(spec.prompt_id)
            .fetch_optional(&self.pool)
            .await?;
        if prompt_exists.is_none() {
            return Err(AppError::NotFound(format!("prompt {}", spec.prompt_id)));
        }

        Ok(cron)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetDirectory;
    use crate::registry::PromptRegistry;
    use crate::types::AssetType;

    struct Fixture {
        tasks: TaskStore,
        assets: AssetDirectory,
        asset_id: i64,
        prompt_id: i64,
    }

    async fn fixture() -> Fixture {
        let pool = db::test_pool().await;
        let assets = AssetDirectory::new(pool.clone());
        let asset_id = assets.create("BTCUSDT", AssetType::Spot).await.unwrap().id;
        let prompt_id = PromptRegistry::new(pool.clone())
            .create_version("trend", "analyze {symbol}")
            .await
            .unwrap()
            .id;
        Fixture { tasks: TaskStore::new(pool), assets, asset_id, prompt_id }
    }

    fn spec(f: &Fixture, cron: &str) -> TaskSpec {
        TaskSpec {
            asset_id: f.asset_id,
            prompt_id: f.prompt_id,
            cycle: Cycle::H1,
            cron_expression: cron.to_string(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn create_validates_cron_and_references() {
        let f = fixture().await;
        assert!(matches!(f.tasks.create(&spec(&f, "nope")).await, Err(AppError::Validation(_))));

        let mut bad_asset = spec(&f, "0 * * * *");
        bad_asset.asset_id = 404;
        assert!(matches!(f.tasks.create(&bad_asset).await, Err(AppError::NotFound(_))));

        let mut bad_prompt = spec(&f, "0 * * * *");
        bad_prompt.prompt_id = 404;
        assert!(matches!(f.tasks.create(&bad_prompt).await, Err(AppError::NotFound(_))));

        assert!(f.tasks.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_active_skips_disabled() {
        let f = fixture().await;
        let on = f.tasks.create(&spec(&f, "0 * * * *")).await.unwrap();
        let mut off = spec(&f, "30 * * * *");
        off.is_active = false;
        f.tasks.create(&off).await.unwrap();

        let active = f.tasks.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, on.id);
        assert_eq!(
            f.tasks.active_for(f.asset_id, Cycle::H1).await.unwrap().map(|t| t.id),
            Some(on.id)
        );
        assert!(f.tasks.active_for(f.asset_id, Cycle::H4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_replaces_definition() {
        let f = fixture().await;
        let t = f.tasks.create(&spec(&f, "0 * * * *")).await.unwrap();

        let mut next = spec(&f, "0 */4 * * *");
        next.cycle = Cycle::H4;
        next.is_active = false;
        let t = f.tasks.update(t.id, &next).await.unwrap();
        assert_eq!(t.cycle, Cycle::H4);
        assert_eq!(t.cron_expression, "0 */4 * * *");
        assert!(!t.is_active);

        assert!(matches!(f.tasks.update(999, &next).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn deleting_asset_cascades_to_tasks() {
        let f = fixture().await;
        let t = f.tasks.create(&spec(&f, "0 * * * *")).await.unwrap();
        f.assets.delete(f.asset_id).await.unwrap();
        assert!(matches!(f.tasks.get(t.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let f = fixture().await;
        assert!(matches!(f.tasks.delete(1).await, Err(AppError::NotFound(_))));
    }
}
