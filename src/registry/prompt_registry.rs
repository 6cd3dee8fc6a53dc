use tracing::info;

use crate::db::{self, models::PromptVersion};
use crate::error::{AppError, Result};

const SELECT_PROMPT: &str =
    "SELECT id, name, version, content, is_active, created_at FROM prompts";

/// Named, versioned prompt content. Owns the `prompts` table.
///
/// Content is immutable once created; `is_active` is the only mutable column,
/// and for a given name at most one row carries it (also enforced by the
/// `idx_prompts_one_active` partial unique index).
#[derive(Clone)]
pub struct PromptRegistry {
    pool: sqlx::SqlitePool,
}

impl PromptRegistry {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Append the next version of `name`. New versions start inactive.
    pub async fn create_version(&self, name: &str, content: &str) -> Result<PromptVersion> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("prompt name must not be empty".to_string()));
        }
        if content.trim().is_empty() {
            return Err(AppError::Validation("prompt content must not be empty".to_string()));
        }

        // Single statement: the version number is computed under the write lock.
        let result = sqlx::query(
            r#"
            INSERT INTO prompts (name, version, content, is_active, created_at)
            SELECT ?1, COALESCE(MAX(version), 0) + 1, ?2, 0, ?3
            FROM prompts WHERE name = ?1
            "#,
        )
        .bind(name)
        .bind(content)
        .bind(db::now_ms())
        .execute(&self.pool)
        .await?;

        let created = self.get(result.last_insert_rowid()).await?;
        info!(
            prompt_id = created.id,
            name = %created.name,
            version = created.version,
            "Prompt version created"
        );
        Ok(created)
    }

    /// Make `id` the active version of its name, deactivating the previous one
    /// in the same transaction. Re-activating the active version is a no-op.
    pub async fn activate(&self, id: i64) -> Result<PromptVersion> {
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction takes the write lock up front.
        let deactivated = sqlx::query(
            r#"
            UPDATE prompts SET is_active = 0
            WHERE is_active = 1
              AND id != ?1
              AND name = (SELECT name FROM prompts WHERE id = ?1)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let activated = sqlx::query("UPDATE prompts SET is_active = 1 WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if activated == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("prompt {id}")));
        }
        tx.commit().await?;

        let prompt = self.get(id).await?;
        info!(
            prompt_id = prompt.id,
            name = %prompt.name,
            version = prompt.version,
            replaced = deactivated,
            "Prompt version activated"
        );
        Ok(prompt)
    }

    /// Remove an inactive version. The active version cannot be deleted.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM prompts WHERE id = ? AND is_active = 0")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 1 {
            info!(prompt_id = id, "Prompt version deleted");
            return Ok(());
        }

        let is_active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM prompts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match is_active {
            None => Err(AppError::NotFound(format!("prompt {id}"))),
            Some(_) => Err(AppError::Conflict(format!(
                "prompt {id} is the active version; activate another version first"
            ))),
        }
    }

    pub async fn get(&self, id: i64) -> Result<PromptVersion> {
        sqlx::query_as::<_, PromptVersion>(&format!("{SELECT_PROMPT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("prompt {id}")))
    }

    pub async fn list_by_name(&self, name: &str) -> Result<Vec<PromptVersion>> {
        let rows = sqlx::query_as::<_, PromptVersion>(&format!(
            "{SELECT_PROMPT} WHERE name = ? ORDER BY version DESC"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_all(&self) -> Result<Vec<PromptVersion>> {
        let rows = sqlx::query_as::<_, PromptVersion>(&format!(
            "{SELECT_PROMPT} ORDER BY name ASC, version DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Active version of `name`, if the name was ever activated.
    pub async fn active_for(&self, name: &str) -> Result<Option<PromptVersion>> {
        let row = sqlx::query_as::<_, PromptVersion>(&format!(
            "{SELECT_PROMPT} WHERE name = ? AND is_active = 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> PromptRegistry {
        PromptRegistry::new(db::test_pool().await)
    }

    async fn active_count(reg: &PromptRegistry, name: &str) -> usize {
        reg.list_by_name(name)
            .await
            .unwrap()
            .iter()
            .filter(|p| p.is_active)
            .count()
    }

    #[tokio::test]
    async fn versions_increment_per_name_and_start_inactive() {
        let reg = registry().await;
        let a1 = reg.create_version("trend", "v1 text").await.unwrap();
        let b1 = reg.create_version("swing", "other").await.unwrap();
        let a2 = reg.create_version("trend", "v2 text").await.unwrap();

        assert_eq!((a1.version, a2.version, b1.version), (1, 2, 1));
        assert!(!a1.is_active && !a2.is_active && !b1.is_active);
    }

    #[tokio::test]
    async fn empty_name_or_content_rejected() {
        let reg = registry().await;
        assert!(matches!(
            reg.create_version("  ", "x").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            reg.create_version("trend", "\n").await,
            Err(AppError::Validation(_))
        ));
        assert!(reg.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activation_scenario_keeps_single_active_version() {
        let reg = registry().await;
        let v1 = reg.create_version("trend-v1", "first").await.unwrap();
        reg.activate(v1.id).await.unwrap();

        let v2 = reg.create_version("trend-v1", "second").await.unwrap();
        assert!(!v2.is_active);
        assert!(reg.get(v1.id).await.unwrap().is_active, "v1 stays active until v2 is activated");

        reg.activate(v2.id).await.unwrap();
        let listed = reg.list_by_name("trend-v1").await.unwrap();
        let summary: Vec<(i64, bool)> = listed.iter().map(|p| (p.version, p.is_active)).collect();
        assert_eq!(summary, vec![(2, true), (1, false)]);
    }

    #[tokio::test]
    async fn reactivating_active_version_is_noop() {
        let reg = registry().await;
        let v1 = reg.create_version("p", "a").await.unwrap();
        let v2 = reg.create_version("p", "b").await.unwrap();
        reg.activate(v2.id).await.unwrap();
        let again = reg.activate(v2.id).await.unwrap();

        assert!(again.is_active);
        assert!(!reg.get(v1.id).await.unwrap().is_active);
        assert_eq!(active_count(&reg, "p").await, 1);
    }

    #[tokio::test]
    async fn activation_does_not_touch_other_names() {
        let reg = registry().await;
        let a = reg.create_version("alpha", "a").await.unwrap();
        let b = reg.create_version("beta", "b").await.unwrap();
        reg.activate(a.id).await.unwrap();
        reg.activate(b.id).await.unwrap();

        assert!(reg.get(a.id).await.unwrap().is_active);
        assert!(reg.get(b.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn activate_unknown_is_not_found_and_changes_nothing() {
        let reg = registry().await;
        let v1 = reg.create_version("p", "a").await.unwrap();
        reg.activate(v1.id).await.unwrap();

        assert!(matches!(reg.activate(999).await, Err(AppError::NotFound(_))));
        assert!(reg.get(v1.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn deleting_active_version_conflicts() {
        let reg = registry().await;
        let v1 = reg.create_version("p", "a").await.unwrap();
        reg.activate(v1.id).await.unwrap();

        assert!(matches!(reg.delete(v1.id).await, Err(AppError::Conflict(_))));
        assert!(reg.get(v1.id).await.is_ok());
    }

    #[tokio::test]
    async fn deleting_inactive_version_keeps_active_one() {
        let reg = registry().await;
        let v1 = reg.create_version("p", "a").await.unwrap();
        let v2 = reg.create_version("p", "b").await.unwrap();
        reg.activate(v2.id).await.unwrap();

        reg.delete(v1.id).await.unwrap();
        assert!(matches!(reg.get(v1.id).await, Err(AppError::NotFound(_))));
        assert_eq!(reg.active_for("p").await.unwrap().map(|p| p.id), Some(v2.id));
        assert!(matches!(reg.delete(v1.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_activations_leave_exactly_one_active() {
        let reg = registry().await;
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(reg.create_version("race", &format!("body {i}")).await.unwrap().id);
        }

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let reg = reg.clone();
                tokio::spawn(async move { reg.activate(id).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(active_count(&reg, "race").await, 1);
    }

    #[tokio::test]
    async fn list_all_orders_by_name_then_version_desc() {
        let reg = registry().await;
        reg.create_version("b", "1").await.unwrap();
        reg.create_version("a", "1").await.unwrap();
        reg.create_version("b", "2").await.unwrap();

        let order: Vec<(String, i64)> = reg
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| (p.name, p.version))
            .collect();
        assert_eq!(
            order,
            vec![("a".to_string(), 1), ("b".to_string(), 2), ("b".to_string(), 1)]
        );
    }
}
