pub mod normalize;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::api::latency::LatencyStats;
use crate::assets::AssetDirectory;
use crate::db;
use crate::engine::{AnalysisEngine, AnalysisRequest};
use crate::error::{AppError, Result};
use crate::history::{AnalysisLog, NewAnalysisRecord, RecordDetail};
use crate::plans::PlanManager;
use crate::registry::PromptRegistry;
use crate::scheduler::single_flight::ExecutionRun;
use crate::types::Conclusion;

use self::normalize::normalize;

/// What a successful pass produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub analysis_id: i64,
    pub conclusion: Conclusion,
    pub plan_id: Option<i64>,
}

/// One analysis pass: resolve, call the engine, normalize, persist.
/// The only writer of analysis records and of new trade plans.
pub struct Pipeline {
    pool: sqlx::SqlitePool,
    assets: AssetDirectory,
    registry: PromptRegistry,
    log: AnalysisLog,
    plans: PlanManager,
    engine: Arc<dyn AnalysisEngine>,
    engine_timeout: Duration,
    latency: Arc<LatencyStats>,
}

impl Pipeline {
    pub fn new(
        pool: sqlx::SqlitePool,
        engine: Arc<dyn AnalysisEngine>,
        engine_timeout: Duration,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            assets: AssetDirectory::new(pool.clone()),
            registry: PromptRegistry::new(pool.clone()),
            log: AnalysisLog::new(pool.clone()),
            plans: PlanManager::new(pool.clone()),
            pool,
            engine,
            engine_timeout,
            latency,
        }
    }

    /// Nothing is written unless the engine returns a well-formed verdict.
    #[tracing::instrument(
        name = "analysis_run",
        skip_all,
        fields(
            asset_id = run.asset_id,
            cycle = %run.cycle,
            task_id = ?run.task_id,
            run_trigger = %run.trigger,
        )
    )]
    pub async fn execute(&self, run: &ExecutionRun) -> Result<RunOutcome> {
        let asset = self.assets.get(run.asset_id).await?;
        let prompt = self.registry.get(run.prompt_version_id).await?;

        let req = AnalysisRequest {
            symbol: asset.symbol.clone(),
            asset_type: asset.asset_type,
            cycle: run.cycle,
            prompt: prompt.content,
        };

        let started = Instant::now();
        let reply = tokio::time::timeout(self.engine_timeout, self.engine.analyze(&req)).await;
        self.latency.record(started.elapsed());
        let reply = match reply {
            Ok(r) => r?,
            Err(_) => {
                warn!(timeout_secs = self.engine_timeout.as_secs_f64(), "Engine call timed out");
                return Err(AppError::Engine(format!(
                    "engine timed out after {:.1}s",
                    self.engine_timeout.as_secs_f64()
                )));
            }
        };

        let verdict = normalize(&reply.raw_text)?;

        let record = NewAnalysisRecord {
            asset: asset.symbol.clone(),
            cycle: run.cycle,
            timestamp: db::now_ms(),
            conclusion: verdict.conclusion,
            detail: RecordDetail {
                trend: verdict.trend,
                confidence: verdict.confidence,
                direction: verdict.direction,
                summary: verdict.summary,
                rationale: verdict.rationale,
                risk_reward_ratio: verdict.risk_reward_ratio,
                entry_point: verdict.entry_point,
                stop_loss: verdict.stop_loss,
                take_profit_1: verdict.take_profit_1,
                take_profit_2: verdict.take_profit_2,
                wave_analysis_4h: verdict.waves.h4,
                wave_analysis_1h: verdict.waves.h1,
                wave_analysis_15m: verdict.waves.m15,
            },
            prompt_version_id: prompt.id,
            task_id: run.task_id,
            raw_response: reply.raw_text,
        };

        // Record and plan land together or not at all.
        let mut tx = self.pool.begin().await?;
        let analysis_id = self.log.append(&mut *tx, &record).await?;
        let plan_id = match &verdict.levels {
            Some(levels) => Some(
                self.plans
                    .create_from_analysis(&mut *tx, analysis_id, &asset.symbol, run.cycle, levels)
                    .await?,
            ),
            None => None,
        };
        tx.commit().await?;

        info!(
            symbol = %asset.symbol,
            analysis_id,
            conclusion = %verdict.conclusion,
            plan_id = ?plan_id,
            "Analysis run complete"
        );
        Ok(RunOutcome { analysis_id, conclusion: verdict.conclusion, plan_id })
    }
}
