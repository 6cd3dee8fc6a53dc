mod api;
mod assets;
mod config;
mod db;
mod engine;
mod error;
mod history;
mod pipeline;
mod plans;
mod registry;
mod scheduler;
mod tasks;
mod types;

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::engine::OpenAiEngine;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    // A missing .env is fine; the process environment still applies.
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&format!("sqlite:{}", cfg.db_path)).await?;
    info!("Database ready at {}", cfg.db_path);

    if cfg.login_secret.is_none() {
        warn!("APP_LOGIN_SECRET_KEY not set: admin API is unauthenticated");
    }
    if cfg.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set: every analysis run will fail at the engine step");
    }

    // --- Shared telemetry ---
    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new());

    // --- Pipeline + scheduler ---
    let engine = OpenAiEngine::new(&cfg)?;
    let pipeline = Arc::new(Pipeline::new(
        pool.clone(),
        Arc::new(engine),
        Duration::from_secs(cfg.engine_timeout_secs),
        Arc::clone(&latency),
    ));
    let scheduler = Scheduler::new(&cfg, pool.clone(), pipeline, Arc::clone(&health));
    tokio::spawn(Arc::clone(&scheduler).run());

    // --- HTTP API server ---
    let api_state = ApiState::new(pool, scheduler, health, latency, cfg.login_secret.clone());
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
