use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, KLINE_INTERVALS, KLINE_LIMIT};
use crate::error::{AppError, Result};
use crate::types::AssetType;

/// Columns kept per kline: open time, open, high, low, close, volume.
const KLINE_COLUMNS: usize = 6;

/// Kline REST client used to build the market context sent with each prompt.
#[derive(Clone)]
pub struct MarketDataClient {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
}

impl MarketDataClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.kline_api_base_url.trim_end_matches('/').to_string(),
            secret: cfg.kline_api_secret.clone(),
        })
    }

    pub fn enabled(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// Latest klines for every context interval, fetched concurrently.
    ///
    /// Returns `Ok(None)` when no kline endpoint is configured. A single
    /// failing interval is logged and left empty; all of them empty is an
    /// engine error since the verdict would have nothing to stand on.
    pub async fn fetch_context(&self, symbol: &str, asset_type: AssetType) -> Result<Option<Value>> {
        if !self.enabled() {
            return Ok(None);
        }

        let fetches = KLINE_INTERVALS
            .iter()
            .map(|interval| self.fetch_interval(symbol, asset_type, interval));
        let results = join_all(fetches).await;

        let mut context = BTreeMap::new();
        for (interval, result) in KLINE_INTERVALS.iter().zip(results) {
            let rows = result.unwrap_or_else(|e| {
                warn!(symbol, interval, error = %e, "Kline fetch failed");
                Vec::new()
            });
            context.insert(interval.to_string(), Value::Array(rows));
        }

        if context.values().all(|v| v.as_array().is_some_and(|a| a.is_empty())) {
            return Err(AppError::Engine(format!("no kline data available for {symbol}")));
        }
        Ok(Some(serde_json::to_value(context)?))
    }

    async fn fetch_interval(&self, symbol: &str, asset_type: AssetType, interval: &str) -> Result<Vec<Value>> {
        let mut req = self
            .client
            .get(&self.base_url)
            .header("accept", "application/json")
            .query(&[
                ("type", asset_type.code().to_string()),
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", KLINE_LIMIT.to_string()),
            ]);
        if let Some(secret) = &self.secret {
            req = req.header("Authorization", format!("Basic {secret}"));
        }

        let body: Value = req.send().await?.error_for_status()?.json().await?;
        let rows = trim_klines(&body);
        debug!(symbol, interval, rows = rows.len(), "Klines fetched");
        Ok(rows)
    }
}

/// Keep the OHLCV prefix of each kline row; non-array payloads yield nothing.
fn trim_klines(body: &Value) -> Vec<Value> {
    body.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_array)
                .map(|row| Value::Array(row.iter().take(KLINE_COLUMNS).cloned().collect()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trims_rows_to_ohlcv() {
        let body = json!([
            [1700000000000_i64, "1.0", "2.0", "0.5", "1.5", "900", 1700000899999_i64, "1350", 42],
            [1700000900000_i64, "1.5", "1.6"],
            "garbage"
        ]);
        let rows = trim_klines(&body);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_array().unwrap().len(), 6);
        assert_eq!(rows[1].as_array().unwrap().len(), 3);
    }

    #[test]
    fn non_array_payload_is_empty() {
        assert!(trim_klines(&json!({"error": "bad symbol"})).is_empty());
    }

    #[tokio::test]
    async fn unconfigured_endpoint_yields_no_context() {
        let client = MarketDataClient::new(&Config::for_tests()).unwrap();
        assert!(!client.enabled());
        assert!(client.fetch_context("BTCUSDT", AssetType::Spot).await.unwrap().is_none());
    }
}
