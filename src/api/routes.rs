use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::auth::{key_matches, require_bearer};
use super::health::HealthState;
use super::latency::{LatencySnapshot, LatencyStats};
use crate::assets::AssetDirectory;
use crate::db::models::{
    AnalysisRecord, AnalysisSummary, Asset, Page, PromptVersion, ScheduledTask, TradePlan,
};
use crate::db::PageRequest;
use crate::error::AppError;
use crate::history::{AnalysisLog, HistoryFilter};
use crate::plans::PlanManager;
use crate::registry::PromptRegistry;
use crate::scheduler::single_flight::ExecutionRun;
use crate::scheduler::Scheduler;
use crate::tasks::{TaskSpec, TaskStore};
use crate::types::{AssetType, Conclusion, Cycle, Direction, PlanStatus};

#[derive(Clone)]
pub struct ApiState {
    pub assets: AssetDirectory,
    pub registry: PromptRegistry,
    pub tasks: TaskStore,
    pub history: AnalysisLog,
    pub plans: PlanManager,
    pub scheduler: Arc<Scheduler>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    /// APP_LOGIN_SECRET_KEY; `None` leaves every route open.
    pub login_secret: Option<Arc<str>>,
}

impl ApiState {
    pub fn new(
        pool: sqlx::SqlitePool,
        scheduler: Arc<Scheduler>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
        login_secret: Option<String>,
    ) -> Self {
        Self {
            assets: AssetDirectory::new(pool.clone()),
            registry: PromptRegistry::new(pool.clone()),
            tasks: TaskStore::new(pool.clone()),
            history: AnalysisLog::new(pool.clone()),
            plans: PlanManager::new(pool),
            scheduler,
            health,
            latency,
            login_secret: login_secret.map(Arc::from),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/stats/latency", get(get_stats_latency))
        .route("/assets", get(list_assets).post(create_asset))
        .route("/assets/:id", put(update_asset).delete(delete_asset))
        .route("/assets/:id/schedule", put(update_asset_schedule))
        .route("/asset-symbols", get(list_asset_symbols))
        .route("/prompts", get(list_prompts).post(create_prompt))
        .route("/prompts/:id", get(get_prompt).delete(delete_prompt))
        .route("/prompts/:id/activate", post(activate_prompt))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task).put(update_task).delete(delete_task))
        .route("/trigger-analysis/:cycle/:symbol", post(trigger_analysis))
        .route("/analysis", get(list_analysis))
        .route("/analysis/:id", get(get_analysis))
        .route("/analysis-history", get(list_analysis_history))
        .route("/plans", get(list_plans))
        .route("/plans/:id", get(get_plan))
        .route("/plans/:id/status", put(update_plan_status))
        .route("/dictionary", get(get_dictionary))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(get_health))
        .route("/verify-key", post(verify_key))
        .merge(protected)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / query types
// ---------------------------------------------------------------------------

/// Asset type in a request body: numeric code or name.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum AssetTypeParam {
    Code(i64),
    Name(String),
}

impl AssetTypeParam {
    fn resolve(&self) -> Result<AssetType, AppError> {
        let parsed = match self {
            AssetTypeParam::Code(code) => AssetType::try_from(*code),
            AssetTypeParam::Name(name) => name.parse::<AssetType>(),
        };
        parsed.map_err(AppError::Validation)
    }
}

#[derive(Deserialize)]
pub struct AssetBody {
    pub symbol: String,
    #[serde(rename = "type")]
    pub asset_type: AssetTypeParam,
}

#[derive(Deserialize)]
pub struct ScheduleBody {
    pub schedule_cron: Option<String>,
}

#[derive(Deserialize)]
pub struct PromptBody {
    pub name: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct PromptsQuery {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct TriggerQuery {
    pub prompt_id: Option<i64>,
    pub asset_type: Option<String>,
}

#[derive(Deserialize)]
pub struct AnalysisQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub asset: Option<String>,
}

/// `/analysis-history` names its page size `size`.
#[derive(Deserialize)]
pub struct AnalysisHistoryQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub asset: Option<String>,
}

#[derive(Deserialize)]
pub struct PlansQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Deserialize)]
pub struct PlanStatusBody {
    pub status: String,
}

#[derive(Deserialize)]
pub struct VerifyKeyBody {
    pub key: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub scheduler: super::health::HealthSnapshot,
    pub in_flight: Vec<ExecutionRun>,
}

#[derive(Serialize)]
pub struct TriggerResponse {
    pub message: String,
    pub run: ExecutionRun,
}

#[derive(Serialize)]
pub struct DictionaryEntry {
    pub code: String,
    pub label: &'static str,
}

#[derive(Serialize)]
pub struct DictionaryResponse {
    pub direction: Vec<DictionaryEntry>,
    pub plan_status: Vec<DictionaryEntry>,
    pub conclusion: Vec<DictionaryEntry>,
    pub cycle: Vec<DictionaryEntry>,
    pub asset_type: Vec<DictionaryEntry>,
}

// ---------------------------------------------------------------------------
// Handlers: service
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        scheduler: state.health.snapshot(),
        in_flight: state.scheduler.in_flight(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

async fn verify_key(
    State(state): State<ApiState>,
    Json(body): Json<VerifyKeyBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(secret) = state.login_secret.as_deref() else {
        return Err(AppError::Config("APP_LOGIN_SECRET_KEY is not configured".to_string()));
    };
    if !key_matches(body.key.trim(), secret) {
        return Err(AppError::Unauthorized("invalid API key".to_string()));
    }
    Ok(Json(serde_json::json!({ "valid": true })))
}

async fn get_dictionary() -> Json<DictionaryResponse> {
    fn entries<T: std::fmt::Display>(items: &[T], label: impl Fn(&T) -> &'static str) -> Vec<DictionaryEntry> {
        items
            .iter()
            .map(|i| DictionaryEntry { code: i.to_string(), label: label(i) })
            .collect()
    }

    Json(DictionaryResponse {
        direction: entries(&Direction::ALL, Direction::label),
        plan_status: entries(&PlanStatus::ALL, PlanStatus::label),
        conclusion: entries(&Conclusion::ALL, Conclusion::label),
        cycle: entries(&Cycle::ALL, Cycle::label),
        asset_type: AssetType::ALL
            .iter()
            .map(|t| DictionaryEntry { code: t.code().to_string(), label: t.label() })
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// Handlers: assets
// ---------------------------------------------------------------------------

async fn list_assets(State(state): State<ApiState>) -> Result<Json<Vec<Asset>>, AppError> {
    Ok(Json(state.assets.list().await?))
}

async fn list_asset_symbols(State(state): State<ApiState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.assets.symbols().await?))
}

async fn create_asset(
    State(state): State<ApiState>,
    Json(body): Json<AssetBody>,
) -> Result<(StatusCode, Json<Asset>), AppError> {
    let asset = state.assets.create(&body.symbol, body.asset_type.resolve()?).await?;
    Ok((StatusCode::CREATED, Json(asset)))
}

async fn update_asset(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<AssetBody>,
) -> Result<Json<Asset>, AppError> {
    Ok(Json(state.assets.update(id, &body.symbol, body.asset_type.resolve()?).await?))
}

async fn delete_asset(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<StatusCode, AppError> {
    state.assets.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_asset_schedule(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<Asset>, AppError> {
    Ok(Json(state.assets.set_schedule(id, body.schedule_cron.as_deref()).await?))
}

// ---------------------------------------------------------------------------
// Handlers: prompts
// ---------------------------------------------------------------------------

async fn list_prompts(
    State(state): State<ApiState>,
    Query(params): Query<PromptsQuery>,
) -> Result<Json<Vec<PromptVersion>>, AppError> {
    let prompts = match params.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => state.registry.list_by_name(name).await?,
        None => state.registry.list_all().await?,
    };
    Ok(Json(prompts))
}

async fn create_prompt(
    State(state): State<ApiState>,
    Json(body): Json<PromptBody>,
) -> Result<(StatusCode, Json<PromptVersion>), AppError> {
    let prompt = state.registry.create_version(&body.name, &body.content).await?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

async fn get_prompt(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<Json<PromptVersion>, AppError> {
    Ok(Json(state.registry.get(id).await?))
}

async fn activate_prompt(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<PromptVersion>, AppError> {
    Ok(Json(state.registry.activate(id).await?))
}

async fn delete_prompt(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<StatusCode, AppError> {
    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Handlers: scheduled tasks
// ---------------------------------------------------------------------------

async fn list_tasks(State(state): State<ApiState>) -> Result<Json<Vec<ScheduledTask>>, AppError> {
    Ok(Json(state.tasks.list().await?))
}

async fn create_task(
    State(state): State<ApiState>,
    Json(spec): Json<TaskSpec>,
) -> Result<(StatusCode, Json<ScheduledTask>), AppError> {
    let task = state.tasks.create(&spec).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<Json<ScheduledTask>, AppError> {
    Ok(Json(state.tasks.get(id).await?))
}

async fn update_task(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(spec): Json<TaskSpec>,
) -> Result<Json<ScheduledTask>, AppError> {
    Ok(Json(state.tasks.update(id, &spec).await?))
}

async fn delete_task(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<StatusCode, AppError> {
    state.tasks.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Handlers: manual trigger
// ---------------------------------------------------------------------------

/// Admit and start a run; returns as soon as it is spawned.
async fn trigger_analysis(
    State(state): State<ApiState>,
    Path((cycle, symbol)): Path<(String, String)>,
    Query(params): Query<TriggerQuery>,
) -> Result<Json<TriggerResponse>, AppError> {
    let cycle: Cycle = cycle.parse().map_err(AppError::Validation)?;
    let asset_type = params
        .asset_type
        .as_deref()
        .map(str::parse::<AssetType>)
        .transpose()
        .map_err(AppError::Validation)?;

    let asset = state.assets.find_by_symbol(&symbol, asset_type).await?;
    let prompt_id = state.scheduler.resolve_prompt(asset.id, cycle, params.prompt_id).await?;
    let manual = state.scheduler.trigger_now(asset.id, cycle, prompt_id).await?;

    Ok(Json(TriggerResponse {
        message: format!("analysis for {} ({}) on {} started", asset.symbol, asset.asset_type, cycle),
        run: manual.run,
    }))
}

// ---------------------------------------------------------------------------
// Handlers: history and plans
// ---------------------------------------------------------------------------

async fn list_analysis(
    State(state): State<ApiState>,
    Query(params): Query<AnalysisQuery>,
) -> Result<Json<Page<AnalysisSummary>>, AppError> {
    let req = PageRequest::new(params.page, params.page_size)?;
    Ok(Json(state.history.list(&HistoryFilter { asset: params.asset }, req).await?))
}

async fn list_analysis_history(
    State(state): State<ApiState>,
    Query(params): Query<AnalysisHistoryQuery>,
) -> Result<Json<Page<AnalysisSummary>>, AppError> {
    let req = PageRequest::new(params.page, params.size)?;
    Ok(Json(state.history.list(&HistoryFilter { asset: params.asset }, req).await?))
}

async fn get_analysis(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<Json<AnalysisRecord>, AppError> {
    Ok(Json(state.history.get(id).await?))
}

async fn list_plans(
    State(state): State<ApiState>,
    Query(params): Query<PlansQuery>,
) -> Result<Json<Page<TradePlan>>, AppError> {
    let req = PageRequest::new(params.page, params.page_size)?;
    Ok(Json(state.plans.list(req).await?))
}

async fn get_plan(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<Json<TradePlan>, AppError> {
    Ok(Json(state.plans.get(id).await?))
}

async fn update_plan_status(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<PlanStatusBody>,
) -> Result<Json<TradePlan>, AppError> {
    let next: PlanStatus = body.status.parse().map_err(AppError::Validation)?;
    Ok(Json(state.plans.update_status(id, next).await?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::sync::Semaphore;
    use tower::ServiceExt; // oneshot

    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::engine::testing::{ScriptedEngine, OPEN_LONG};
    use crate::pipeline::Pipeline;

    const KEY: &str = "s3cret";

    async fn make_router(secret: Option<&str>, engine: ScriptedEngine) -> Router {
        let pool = db::test_pool().await;
        let health = Arc::new(HealthState::new());
        let latency = Arc::new(LatencyStats::new());
        let pipeline = Arc::new(Pipeline::new(
            pool.clone(),
            Arc::new(engine),
            Duration::from_secs(5),
            latency.clone(),
        ));
        let scheduler = Scheduler::new(&Config::for_tests(), pool.clone(), pipeline, health.clone());
        router(ApiState::new(pool, scheduler, health, latency, secret.map(str::to_string)))
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        call_with(router, method, uri, body, None).await
    }

    async fn call_with(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header("authorization", format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.expect("oneshot failed");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body collect failed").to_bytes();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    #[tokio::test]
    async fn health_is_open_even_with_secret() {
        let r = make_router(Some(KEY), ScriptedEngine::replying(OPEN_LONG)).await;
        let (status, body) = call(&r, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["in_flight"], json!([]));
    }

    #[tokio::test]
    async fn admin_routes_require_bearer_when_secret_set() {
        let r = make_router(Some(KEY), ScriptedEngine::replying(OPEN_LONG)).await;
        let (status, body) = call(&r, Method::GET, "/assets", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthorized");

        let (status, _) = call_with(&r, Method::GET, "/assets", None, Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call_with(&r, Method::GET, "/assets", None, Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn verify_key_outcomes() {
        let open = make_router(None, ScriptedEngine::replying(OPEN_LONG)).await;
        let (status, _) = call(&open, Method::POST, "/verify-key", Some(json!({"key": "x"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let r = make_router(Some(KEY), ScriptedEngine::replying(OPEN_LONG)).await;
        let (status, _) = call(&r, Method::POST, "/verify-key", Some(json!({"key": "nope"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = call(&r, Method::POST, "/verify-key", Some(json!({"key": KEY}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"valid": true}));
    }

    #[tokio::test]
    async fn asset_crud_and_duplicate_conflict() {
        let r = make_router(None, ScriptedEngine::replying(OPEN_LONG)).await;
        let (status, asset) =
            call(&r, Method::POST, "/assets", Some(json!({"symbol": "btcusdt", "type": 1}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(asset["symbol"], "BTCUSDT");
        assert_eq!(asset["type"], "USD_M");

        let (status, body) =
            call(&r, Method::POST, "/assets", Some(json!({"symbol": "BTCUSDT", "type": "USD_M"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");

        let id = asset["id"].as_i64().unwrap();
        let (status, body) = call(
            &r,
            Method::PUT,
            &format!("/assets/{id}/schedule"),
            Some(json!({"schedule_cron": "every minute"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");

        let (status, symbols) = call(&r, Method::GET, "/asset-symbols", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(symbols, json!(["BTCUSDT"]));

        let (status, _) = call(&r, Method::DELETE, &format!("/assets/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&r, Method::DELETE, &format!("/assets/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prompt_lifecycle_over_http() {
        let r = make_router(None, ScriptedEngine::replying(OPEN_LONG)).await;
        let (status, v1) =
            call(&r, Method::POST, "/prompts", Some(json!({"name": "trend", "content": "a"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, v2) = call(&r, Method::POST, "/prompts", Some(json!({"name": "trend", "content": "b"}))).await;
        assert_eq!(v2["version"], 2);

        let v1_id = v1["id"].as_i64().unwrap();
        let (status, active) = call(&r, Method::POST, &format!("/prompts/{v1_id}/activate"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(active["is_active"], true);

        let (status, body) = call(&r, Method::DELETE, &format!("/prompts/{v1_id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");

        let (_, listed) = call(&r, Method::GET, "/prompts?name=trend", None).await;
        let versions: Vec<i64> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["version"].as_i64().unwrap())
            .collect();
        assert_eq!(versions, vec![2, 1]);

        let (status, _) = call(&r, Method::POST, "/prompts", Some(json!({"name": "", "content": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trigger_analysis_busy_then_plan_lifecycle() {
        let gate = Arc::new(Semaphore::new(0));
        let r = make_router(None, ScriptedEngine::replying(OPEN_LONG).held(gate.clone())).await;

        let (status, _) = call(&r, Method::POST, "/trigger-analysis/1h/BTCUSDT", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(&r, Method::POST, "/assets", Some(json!({"symbol": "BTCUSDT", "type": 0}))).await;
        // No task and no active default prompt yet.
        let (status, _) = call(&r, Method::POST, "/trigger-analysis/1h/BTCUSDT", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, p) = call(
            &r,
            Method::POST,
            "/prompts",
            Some(json!({"name": "market-analysis", "content": "Analyze {symbol}"})),
        )
        .await;
        let pid = p["id"].as_i64().unwrap();
        call(&r, Method::POST, &format!("/prompts/{pid}/activate"), None).await;

        let (status, body) = call(&r, Method::POST, "/trigger-analysis/1h/btcusdt", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["run"]["trigger"], "manual");
        assert_eq!(body["run"]["prompt_version_id"], pid);

        let (status, body) = call(&r, Method::POST, "/trigger-analysis/1h/BTCUSDT", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "busy");

        let (status, _) = call(&r, Method::POST, "/trigger-analysis/2h/BTCUSDT", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        gate.add_permits(1);
        let mut plans = Value::Null;
        for _ in 0..200 {
            let (_, page) = call(&r, Method::GET, "/plans", None).await;
            if page["total_records"] == 1 {
                plans = page;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let plan = &plans["data"][0];
        assert_eq!(plan["status"], "PENDING");
        assert_eq!(plan["entry_price"], 100.0);
        let plan_id = plan["id"].as_i64().unwrap();

        let status_uri = format!("/plans/{plan_id}/status");
        let (status, _) = call(&r, Method::PUT, &status_uri, Some(json!({"status": "active"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&r, Method::PUT, &status_uri, Some(json!({"status": "CLOSED"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&r, Method::PUT, &status_uri, Some(json!({"status": "ACTIVE"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "invalid_transition");

        let (_, history) = call(&r, Method::GET, "/analysis?page=1&page_size=10&asset=BTCUSDT", None).await;
        assert_eq!(history["total_records"], 1);
        assert!(history["data"][0].get("raw_response").is_none());
        let analysis_id = history["data"][0]["id"].as_i64().unwrap();
        let (_, full) = call(&r, Method::GET, &format!("/analysis/{analysis_id}"), None).await;
        assert!(full["raw_response"].as_str().unwrap().contains("OPEN_POSITION"));
    }

    #[tokio::test]
    async fn analysis_paging_bounds() {
        let r = make_router(None, ScriptedEngine::replying(OPEN_LONG)).await;
        let (status, _) = call(&r, Method::GET, "/analysis?page=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&r, Method::GET, "/analysis-history?size=101", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&r, Method::GET, "/analysis-history?page=5&size=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
        assert_eq!(body["page"], 5);
        assert_eq!(body["total_pages"], 0);
    }

    #[tokio::test]
    async fn task_validation_over_http() {
        let r = make_router(None, ScriptedEngine::replying(OPEN_LONG)).await;
        let (_, asset) = call(&r, Method::POST, "/assets", Some(json!({"symbol": "ETHUSDT", "type": 0}))).await;
        let (_, prompt) = call(&r, Method::POST, "/prompts", Some(json!({"name": "p", "content": "x"}))).await;
        let spec = |cron: &str| {
            json!({
                "asset_id": asset["id"],
                "prompt_id": prompt["id"],
                "cycle": "4h",
                "cron_expression": cron,
            })
        };

        let (status, _) = call(&r, Method::POST, "/tasks", Some(spec("bogus"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, task) = call(&r, Method::POST, "/tasks", Some(spec("0 */4 * * *"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task["is_active"], true);
        assert_eq!(task["cycle"], "4h");

        let (_, tasks) = call(&r, Method::GET, "/tasks", None).await;
        assert_eq!(tasks.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dictionary_lists_enum_labels() {
        let r = make_router(None, ScriptedEngine::replying(OPEN_LONG)).await;
        let (status, body) = call(&r, Method::GET, "/dictionary", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan_status"].as_array().unwrap().len(), 4);
        assert_eq!(body["direction"][0], json!({"code": "LONG", "label": "Long"}));
        assert_eq!(body["asset_type"][1]["code"], "1");
        assert_eq!(body["cycle"][0]["code"], "15m");
    }
}
