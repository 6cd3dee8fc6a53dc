pub mod cron;
pub mod legacy;
pub mod single_flight;

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::assets::AssetDirectory;
use crate::config::Config;
use crate::db;
use crate::error::{AppError, Result};
use crate::pipeline::{Pipeline, RunOutcome};
use crate::registry::PromptRegistry;
use crate::tasks::TaskStore;
use crate::types::{Cycle, RunTrigger};

use self::cron::CronSchedule;
use self::single_flight::{ExecutionRun, SingleFlight, SlotGuard};

/// Counts from one evaluation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub admitted: usize,
    pub dropped: usize,
}

/// Wall-clock source for cron evaluation.
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A manually triggered run that was admitted and spawned.
pub struct ManualRun {
    pub run: ExecutionRun,
    pub handle: JoinHandle<Result<RunOutcome>>,
}

/// Cron-driven admission of pipeline runs.
///
/// Every tick lists the active tasks, fires those with an occurrence since the
/// previous tick, and hands admitted runs to a bounded worker pool. A fire
/// whose (asset, cycle) slot is occupied is dropped, never queued.
pub struct Scheduler {
    tasks: TaskStore,
    assets: AssetDirectory,
    registry: PromptRegistry,
    pipeline: Arc<Pipeline>,
    gate: Arc<SingleFlight>,
    workers: Arc<Semaphore>,
    health: Arc<HealthState>,
    tz: Tz,
    tick: Duration,
    default_prompt_name: String,
    legacy_cycle: Cycle,
    clock: Clock,
}

impl Scheduler {
    pub fn new(
        cfg: &Config,
        pool: sqlx::SqlitePool,
        pipeline: Arc<Pipeline>,
        health: Arc<HealthState>,
    ) -> Arc<Self> {
        Self::with_clock(cfg, pool, pipeline, health, Box::new(Utc::now))
    }

    pub fn with_clock(
        cfg: &Config,
        pool: sqlx::SqlitePool,
        pipeline: Arc<Pipeline>,
        health: Arc<HealthState>,
        clock: Clock,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: TaskStore::new(pool.clone()),
            assets: AssetDirectory::new(pool.clone()),
            registry: PromptRegistry::new(pool),
            pipeline,
            gate: SingleFlight::new(),
            workers: Arc::new(Semaphore::new(cfg.worker_pool_size)),
            health,
            tz: cfg.scheduler_tz,
            tick: Duration::from_secs(cfg.scheduler_tick_secs.max(1)),
            default_prompt_name: cfg.default_prompt_name.clone(),
            legacy_cycle: cfg.legacy_cycle,
            clock,
        })
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await; // consume immediate first tick

        // Occurrences before process start are never replayed.
        let mut last_eval = self.now();
        info!(tick_secs = self.tick.as_secs(), tz = %self.tz, "Scheduler started");

        loop {
            interval.tick().await;
            let now = self.now();
            match self.evaluate(&last_eval, &now).await {
                Ok(report) if report.due > 0 => info!(
                    due = report.due,
                    admitted = report.admitted,
                    dropped = report.dropped,
                    in_flight = self.gate.len(),
                    "Scheduler tick"
                ),
                Ok(_) => debug!("Scheduler tick: nothing due"),
                Err(e) => error!("Scheduler tick error: {e}"),
            }
            last_eval = now;
            self.health.record_tick(db::now_ms());
        }
    }

    /// Fire everything with an occurrence in `(since, now]`.
    pub async fn evaluate(&self, since: &DateTime<Tz>, now: &DateTime<Tz>) -> Result<TickReport> {
        let mut report = TickReport::default();
        let tasks = self.tasks.list_active().await?;
        let mut tasked = HashSet::new();

        for task in &tasks {
            tasked.insert(task.asset_id);
            let cron = match CronSchedule::parse(&task.cron_expression) {
                Ok(c) => c,
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "Skipping task with unparseable cron");
                    continue;
                }
            };
            if !cron.is_due(since, now) {
                continue;
            }
            report.due += 1;
            self.admit_or_drop(
                ExecutionRun {
                    task_id: Some(task.id),
                    asset_id: task.asset_id,
                    cycle: task.cycle,
                    prompt_version_id: task.prompt_id,
                    started_at: db::now_ms(),
                    trigger: RunTrigger::Scheduled,
                },
                &mut report,
            );
        }

        if let Err(e) = self.evaluate_legacy(&tasked, since, now, &mut report).await {
            error!("Legacy schedule evaluation failed: {e}");
        }
        Ok(report)
    }

    async fn evaluate_legacy(
        &self,
        tasked: &HashSet<i64>,
        since: &DateTime<Tz>,
        now: &DateTime<Tz>,
        report: &mut TickReport,
    ) -> Result<()> {
        let scheduled = self.assets.list_scheduled().await?;
        let due = legacy::due_assets(&scheduled, tasked, since, now);
        if due.is_empty() {
            return Ok(());
        }

        let Some(prompt) = self.registry.active_for(&self.default_prompt_name).await? else {
            warn!(
                prompt = %self.default_prompt_name,
                assets = due.len(),
                "Legacy schedules due but the default prompt has no active version"
            );
            return Ok(());
        };

        for asset in due {
            report.due += 1;
            self.admit_or_drop(
                ExecutionRun {
                    task_id: None,
                    asset_id: asset.id,
                    cycle: self.legacy_cycle,
                    prompt_version_id: prompt.id,
                    started_at: db::now_ms(),
                    trigger: RunTrigger::Legacy,
                },
                report,
            );
        }
        Ok(())
    }

    fn admit_or_drop(&self, run: ExecutionRun, report: &mut TickReport) {
        let (asset_id, cycle, task_id, trigger) = (run.asset_id, run.cycle, run.task_id, run.trigger);
        match self.gate.try_acquire(run) {
            Some(guard) => {
                report.admitted += 1;
                // Completion is observed through health counters and logs.
                let _ = self.spawn(guard);
            }
            None => {
                report.dropped += 1;
                self.health.inc_dropped();
                info!(
                    asset_id,
                    cycle = %cycle,
                    task_id = ?task_id,
                    run_trigger = %trigger,
                    "Fire dropped: run already in flight"
                );
            }
        }
    }

    /// Run now through the same single-flight gate.
    ///
    /// `Busy` if the slot is occupied; `NotFound` if the asset or prompt
    /// version does not exist (the slot is released before returning).
    pub async fn trigger_now(&self, asset_id: i64, cycle: Cycle, prompt_id: i64) -> Result<ManualRun> {
        let guard = self
            .gate
            .try_acquire(ExecutionRun {
                task_id: None,
                asset_id,
                cycle,
                prompt_version_id: prompt_id,
                started_at: db::now_ms(),
                trigger: RunTrigger::Manual,
            })
            .ok_or_else(|| {
                AppError::Busy(format!("analysis for asset {asset_id} on {cycle} is already running"))
            })?;

        self.assets.get(asset_id).await?;
        self.registry.get(prompt_id).await?;

        let run = guard.run().clone();
        info!(asset_id, cycle = %cycle, prompt_id, "Manual run admitted");
        Ok(ManualRun { run, handle: self.spawn(guard) })
    }

    /// Prompt for a manual run: the explicit id, else the asset/cycle task's
    /// prompt, else the active version of the default prompt name.
    pub async fn resolve_prompt(&self, asset_id: i64, cycle: Cycle, explicit: Option<i64>) -> Result<i64> {
        if let Some(id) = explicit {
            return Ok(id);
        }
        if let Some(task) = self.tasks.active_for(asset_id, cycle).await? {
            return Ok(task.prompt_id);
        }
        match self.registry.active_for(&self.default_prompt_name).await? {
            Some(p) => Ok(p.id),
            None => Err(AppError::NotFound(format!(
                "no prompt for asset {asset_id} on {cycle}: no task and '{}' has no active version",
                self.default_prompt_name
            ))),
        }
    }

    pub fn in_flight(&self) -> Vec<ExecutionRun> {
        self.gate.in_flight()
    }

    fn spawn(&self, guard: SlotGuard) -> JoinHandle<Result<RunOutcome>> {
        let pipeline = Arc::clone(&self.pipeline);
        let workers = Arc::clone(&self.workers);
        let health = Arc::clone(&self.health);

        tokio::spawn(async move {
            // The slot stays held while waiting for a worker.
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|_| AppError::Busy("worker pool closed".to_string()))?;

            let result = match AssertUnwindSafe(pipeline.execute(guard.run())).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        asset_id = guard.run().asset_id,
                        cycle = %guard.run().cycle,
                        "Analysis run panicked: {msg}"
                    );
                    Err(AppError::Internal(format!("analysis run panicked: {msg}")))
                }
            };
            match &result {
                Ok(_) => health.inc_completed(),
                Err(e) => {
                    health.inc_failed();
                    warn!(
                        asset_id = guard.run().asset_id,
                        cycle = %guard.run().cycle,
                        kind = e.kind(),
                        "Analysis run failed: {e}"
                    );
                }
            }
            drop(guard);
            result
        })
    }

    fn now(&self) -> DateTime<Tz> {
        (self.clock)().with_timezone(&self.tz)
    }
}
