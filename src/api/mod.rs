//! HTTP API.
//!
//! All routes live under `/api/v1` except the Prometheus scrape endpoint,
//! which is served at `/metrics`.

use crate::compute::{ModelHandle, ModelInfo};
use crate::error::{ChurnError, Result};
use crate::health::{HealthChecker, HealthResponse};
use crate::observability;
use crate::service::{
    BatchPredictionRequest, BatchPredictionResponse, MetricsResponse, MetricsService,
    PredictionRequest, PredictionResponse, PredictionService,
};
use crate::types::ModelVersion;
use crate::App;
use axum::{
    body::Body,
    extract::{MatchedPath, Path, Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    predictions: PredictionService,
    metrics: MetricsService,
    models: Arc<ModelHandle>,
    health: HealthChecker,
    prometheus: Option<PrometheusHandle>,
    request_timeout: Duration,
    max_batch_size: usize,
}

impl AppState {
    pub fn new(app: &App, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            predictions: app.prediction_service(),
            metrics: app.metrics_service(),
            models: app.models.clone(),
            health: app.health_checker(),
            prometheus,
            request_timeout: app.config.server.request_timeout,
            max_batch_size: app.config.server.max_batch_size,
        }
    }

    /// Replaces the prediction service, e.g. with a seeded router.
    pub fn with_predictions(mut self, predictions: PredictionService) -> Self {
        self.predictions = predictions;
        self
    }
}

/// Error body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn api_error(e: ChurnError) -> ApiError {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %e, "Request failed");
    }
    (status, Json(ErrorBody { detail: e.to_string() }))
}

/// Builds the router over `state`.
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/predict", post(predict))
        .route("/predict/batch", post(predict_batch))
        .route("/models", get(list_models))
        .route("/models/info/current", get(current_models))
        .route("/models/reload", post(reload_models))
        .route("/models/:version", get(get_model))
        .route("/metrics", get(model_metrics))
        .route("/health", get(health));

    Router::new()
        .route("/", get(root))
        .route("/metrics", get(prometheus))
        .nest("/api/v1", v1)
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Serves the API until Ctrl+C.
pub async fn serve(app: App, prometheus: Option<PrometheusHandle>) -> Result<()> {
    let addr = app.config.server.bind_addr;
    let state = AppState::new(&app, prometheus);

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ChurnError::Network(e.to_string()))?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
}

async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    observability::record_http_request(&method, &route, response.status().as_u16());
    response
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ChurnError::Internal(format!("request exceeded {:?}", limit)))?
}

#[derive(Serialize)]
struct RootResponse {
    service: &'static str,
    version: &'static str,
    docs: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        service: "churnserve",
        version: env!("CARGO_PKG_VERSION"),
        docs: "/api/v1",
    })
}

async fn prometheus(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictionRequest>,
) -> ApiResult<PredictionResponse> {
    with_timeout(state.request_timeout, state.predictions.predict_single(&request.customer))
        .await
        .map(Json)
        .map_err(api_error)
}

async fn predict_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchPredictionRequest>,
) -> ApiResult<BatchPredictionResponse> {
    if request.customers.len() > state.max_batch_size {
        return Err(api_error(ChurnError::Validation(format!(
            "batch of {} exceeds the limit of {}",
            request.customers.len(),
            state.max_batch_size
        ))));
    }

    with_timeout(state.request_timeout, state.predictions.predict_batch(&request.customers))
        .await
        .map(Json)
        .map_err(api_error)
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelVersion>> {
    Json(state.metrics.get_all_model_versions().await)
}

async fn get_model(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> ApiResult<ModelVersion> {
    state
        .metrics
        .get_model_version(&version)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn current_models(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(state.models.current().get_info())
}

async fn reload_models(State(state): State<AppState>) -> Json<ModelInfo> {
    let info = state.models.reload().await;
    info!(active = ?info.active_version, canary = ?info.canary_version, "Models reloaded");
    Json(info)
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    model_version: Option<String>,
}

async fn model_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> ApiResult<MetricsResponse> {
    state
        .metrics
        .get_latest_metrics(query.model_version.as_deref())
        .await
        .map(Json)
        .map_err(api_error)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let response = state.health.check_health().await;
    let status =
        StatusCode::from_u16(response.status.to_status_code()).unwrap_or(StatusCode::OK);
    (status, Json(response))
}
