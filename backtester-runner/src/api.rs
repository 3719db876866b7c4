//! HTTP/JSON gateway onto the run manager.
//!
//! Every method answers `GET /v1/<methodname>`; the config-bearing method
//! also takes POST. Failures come back as the manager error's HTTP status
//! with a `{code, message}` body.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use backtester_core::domain::RunId;
use backtester_core::Config;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::RunError;
use crate::manager::{RunManager, RunSummary};
use crate::report::RunReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl From<&RunError> for ApiError {
    fn from(err: &RunError) -> Self {
        Self { code: err.code().to_string(), message: err.to_string() }
    }
}

impl IntoResponse for RunError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(code = self.code(), error = %self, "request failed");
        }
        (status, Json(ApiError::from(&self))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, RunError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub run: RunSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsResponse {
    pub runs: Vec<RunSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIdError {
    pub id: RunId,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopAllResponse {
    pub stopped: Vec<RunSummary>,
    pub errors: Vec<RunIdError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearAllResponse {
    pub cleared: Vec<RunSummary>,
    pub remaining: Vec<RunSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub runs: usize,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub path: PathBuf,
    #[serde(default)]
    pub do_not_run_immediately: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub config: Config,
    #[serde(default)]
    pub do_not_run_immediately: bool,
}

/// `?id=<uuid>`. A malformed id is rejected by the extractor with 400.
#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: RunId,
}

pub fn router(manager: Arc<RunManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/executestrategyfromfile", get(execute_strategy_from_file))
        .route(
            "/v1/executestrategyfromconfig",
            get(execute_strategy_from_config).post(execute_strategy_from_config),
        )
        .route("/v1/listallruns", get(list_all_runs))
        .route("/v1/startrunbyid", get(start_run_by_id))
        .route("/v1/stoprunbyid", get(stop_run_by_id))
        .route("/v1/stopallruns", get(stop_all_runs))
        .route("/v1/clearrun", get(clear_run))
        .route("/v1/clearallruns", get(clear_all_runs))
        .route("/v1/runreport", get(run_report))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Serve until `shutdown` resolves, then stop every run still going.
pub async fn serve(
    listener: TcpListener,
    manager: Arc<RunManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "listening");
    axum::serve(listener, router(Arc::clone(&manager)))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("server shutting down, stopping runs");
    let results = manager.stop_all().await;
    let stopped = results.iter().filter(|(_, r)| r.is_ok()).count();
    info!(stopped, "runs stopped");
    Ok(())
}

/// Resolves on Ctrl+C. Never resolves when the handler cannot be installed.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn launch(manager: &RunManager, id: RunId, do_not_run_immediately: bool) -> ApiResult<RunResponse> {
    let run = if do_not_run_immediately { manager.summary(id)? } else { manager.start(id)? };
    Ok(Json(RunResponse { run }))
}

async fn health(State(manager): State<Arc<RunManager>>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".into(), runs: manager.list().len() })
}

async fn execute_strategy_from_file(
    State(manager): State<Arc<RunManager>>,
    Query(query): Query<FileQuery>,
) -> ApiResult<RunResponse> {
    let id = manager.create_from_file(&query.path)?;
    launch(&manager, id, query.do_not_run_immediately)
}

async fn execute_strategy_from_config(
    State(manager): State<Arc<RunManager>>,
    Json(request): Json<ConfigRequest>,
) -> ApiResult<RunResponse> {
    let id = manager.create_from_config(request.config)?;
    launch(&manager, id, request.do_not_run_immediately)
}

async fn list_all_runs(State(manager): State<Arc<RunManager>>) -> Json<RunsResponse> {
    Json(RunsResponse { runs: manager.list() })
}

async fn start_run_by_id(
    State(manager): State<Arc<RunManager>>,
    Query(query): Query<IdQuery>,
) -> ApiResult<RunResponse> {
    let run = manager.start(query.id)?;
    Ok(Json(RunResponse { run }))
}

async fn stop_run_by_id(
    State(manager): State<Arc<RunManager>>,
    Query(query): Query<IdQuery>,
) -> ApiResult<RunResponse> {
    let run = manager.stop(query.id).await?;
    Ok(Json(RunResponse { run }))
}

async fn stop_all_runs(State(manager): State<Arc<RunManager>>) -> Json<StopAllResponse> {
    let mut response = StopAllResponse { stopped: Vec::new(), errors: Vec::new() };
    for (id, result) in manager.stop_all().await {
        match result {
            Ok(run) => response.stopped.push(run),
            Err(err) => response.errors.push(RunIdError { id, code: err.code().into(), message: err.to_string() }),
        }
    }
    Json(response)
}

async fn clear_run(State(manager): State<Arc<RunManager>>, Query(query): Query<IdQuery>) -> ApiResult<RunResponse> {
    let run = manager.clear_run(query.id)?;
    Ok(Json(RunResponse { run }))
}

async fn clear_all_runs(State(manager): State<Arc<RunManager>>) -> Json<ClearAllResponse> {
    let (cleared, remaining) = manager.clear_all_runs();
    Json(ClearAllResponse { cleared, remaining })
}

async fn run_report(State(manager): State<Arc<RunManager>>, Query(query): Query<IdQuery>) -> ApiResult<RunReport> {
    Ok(Json(manager.run_report(query.id).await?))
}
