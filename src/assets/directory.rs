use tracing::info;

use crate::db::models::Asset;
use crate::error::{AppError, Result};
use crate::scheduler::cron::normalize_optional;
use crate::types::AssetType;

const SELECT_ASSET: &str = "SELECT id, symbol, asset_type, schedule_cron FROM assets";

/// Symbol + instrument-type master data. The orchestration core only reads it;
/// CRUD is served for the admin surface.
#[derive(Clone)]
pub struct AssetDirectory {
    pool: sqlx::SqlitePool,
}

impl AssetDirectory {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<Asset>> {
        let rows = sqlx::query_as::<_, Asset>(&format!("{SELECT_ASSET} ORDER BY symbol ASC, asset_type ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn symbols(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar("SELECT DISTINCT symbol FROM assets ORDER BY symbol ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: i64) -> Result<Asset> {
        sqlx::query_as::<_, Asset>(&format!("{SELECT_ASSET} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("asset {id}")))
    }

    /// Resolve a symbol. Without an explicit type the lowest type code wins
    /// (spot before USD-M before COIN-M).
    pub async fn find_by_symbol(&self, symbol: &str, asset_type: Option<AssetType>) -> Result<Asset> {
        let symbol = normalize_symbol(symbol);
        let row = match asset_type {
            Some(t) => {
                sqlx::query_as::<_, Asset>(&format!("{SELECT_ASSET} WHERE symbol = ? AND asset_type = ?"))
                    .bind(&symbol)
                    .bind(t.code())
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, Asset>(&format!(
                    "{SELECT_ASSET} WHERE symbol = ? ORDER BY asset_type ASC LIMIT 1"
                ))
                .bind(&symbol)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        row.ok_or_else(|| AppError::NotFound(format!("asset '{symbol}'")))
    }

    pub async fn create(&self, symbol: &str, asset_type: AssetType) -> Result<Asset> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(AppError::Validation("asset symbol must not be empty".to_string()));
        }

        let result = sqlx::query("INSERT OR IGNORE INTO assets (symbol, asset_type) VALUES (?, ?)")
            .bind(&symbol)
            .bind(asset_type.code())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "asset '{symbol}' of type {asset_type} already exists"
            )));
        }

        info!(symbol = %symbol, asset_type = %asset_type, "Asset created");
        self.get(result.last_insert_rowid()).await
    }

    pub async fn update(&self, id: i64, symbol: &str, asset_type: AssetType) -> Result<Asset> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(AppError::Validation("asset symbol must not be empty".to_string()));
        }

        let updated = sqlx::query("UPDATE OR IGNORE assets SET symbol = ?, asset_type = ? WHERE id = ?")
            .bind(&symbol)
            .bind(asset_type.code())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            // Either the id is unknown or the new (symbol, type) pair collides.
            self.get(id).await?;
            return Err(AppError::Conflict(format!(
                "asset '{symbol}' of type {asset_type} already exists"
            )));
        }
        self.get(id).await
    }

    /// Delete an asset. Its scheduled tasks are removed by cascade.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM assets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(AppError::NotFound(format!("asset {id}")));
        }
        info!(asset_id = id, "Asset deleted");
        Ok(())
    }

    /// Set or clear the legacy per-asset cron field. Blank clears it.
    pub async fn set_schedule(&self, id: i64, cron: Option<&str>) -> Result<Asset> {
        let cron = normalize_optional(cron)?;
        let updated = sqlx::query("UPDATE assets SET schedule_cron = ? WHERE id = ?")
            .bind(&cron)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(AppError::NotFound(format!("asset {id}")));
        }
        info!(asset_id = id, schedule = ?cron, "Legacy asset schedule updated");
        self.get(id).await
    }

    /// Assets carrying a legacy cron field.
    pub async fn list_scheduled(&self) -> Result<Vec<Asset>> {
        let rows = sqlx::query_as::<_, Asset>(&format!(
            "{SELECT_ASSET} WHERE schedule_cron IS NOT NULL ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn directory() -> AssetDirectory {
        AssetDirectory::new(db::test_pool().await)
    }

    #[tokio::test]
    async fn duplicate_symbol_and_type_conflicts() {
        let dir = directory().await;
        dir.create("btcusdt", AssetType::Spot).await.unwrap();
        assert!(matches!(
            dir.create("BTCUSDT", AssetType::Spot).await,
            Err(AppError::Conflict(_))
        ));
        // Same symbol, other instrument type is a separate asset.
        dir.create("BTCUSDT", AssetType::UsdM).await.unwrap();
        assert_eq!(dir.list().await.unwrap().len(), 2);
        assert_eq!(dir.symbols().await.unwrap(), vec!["BTCUSDT".to_string()]);
    }

    #[tokio::test]
    async fn find_by_symbol_prefers_explicit_type() {
        let dir = directory().await;
        let spot = dir.create("ETHUSDT", AssetType::Spot).await.unwrap();
        let perp = dir.create("ETHUSDT", AssetType::UsdM).await.unwrap();

        assert_eq!(dir.find_by_symbol("ethusdt", None).await.unwrap().id, spot.id);
        assert_eq!(
            dir.find_by_symbol("ETHUSDT", Some(AssetType::UsdM)).await.unwrap().id,
            perp.id
        );
        assert!(matches!(
            dir.find_by_symbol("ETHUSDT", Some(AssetType::CoinM)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn legacy_schedule_validates_cron() {
        let dir = directory().await;
        let a = dir.create("SOLUSDT", AssetType::Spot).await.unwrap();

        assert!(matches!(
            dir.set_schedule(a.id, Some("every hour")).await,
            Err(AppError::Validation(_))
        ));
        let a = dir.set_schedule(a.id, Some("0 * * * *")).await.unwrap();
        assert_eq!(a.schedule_cron.as_deref(), Some("0 * * * *"));
        assert_eq!(dir.list_scheduled().await.unwrap().len(), 1);

        let a = dir.set_schedule(a.id, Some("")).await.unwrap();
        assert!(a.schedule_cron.is_none());
        assert!(matches!(
            dir.set_schedule(999, None).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_and_delete() {
        let dir = directory().await;
        let a = dir.create("XRPUSDT", AssetType::Spot).await.unwrap();
        let b = dir.create("ADAUSDT", AssetType::Spot).await.unwrap();

        let a = dir.update(a.id, "XRPUSD", AssetType::CoinM).await.unwrap();
        assert_eq!((a.symbol.as_str(), a.asset_type), ("XRPUSD", AssetType::CoinM));
        assert!(matches!(
            dir.update(b.id, "XRPUSD", AssetType::CoinM).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            dir.update(999, "DOGEUSDT", AssetType::Spot).await,
            Err(AppError::NotFound(_))
        ));

        dir.delete(a.id).await.unwrap();
        assert!(matches!(dir.delete(a.id).await, Err(AppError::NotFound(_))));
    }
}
