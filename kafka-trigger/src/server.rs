use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{MatchedPath, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::scaler::{
    MetricsSample, ScaleMonitor, ScaleVote, ScalerRegistry, TargetScaler, TargetScalerContext,
    TargetScalerResult,
};

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<ScaleMonitor>,
    pub target_scaler: Arc<TargetScaler>,
    pub registry: Arc<ScalerRegistry>,
    pub ready: Arc<AtomicBool>,
}

#[derive(Debug, Deserialize)]
pub struct MonitorQuery {
    #[serde(default)]
    pub worker_count: u32,
}

#[derive(Debug, Serialize)]
pub struct MonitorResponse {
    pub descriptor_id: String,
    pub samples: Vec<MetricsSample>,
    pub vote: ScaleVote,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub async fn index() -> &'static str {
    "kafka trigger"
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

/// Take a fresh sample, then vote on the sample window
pub async fn scale_monitor(
    State(state): State<AppState>,
    Query(query): Query<MonitorQuery>,
) -> ApiResult<MonitorResponse> {
    let monitor = state.monitor.clone();
    tokio::task::spawn_blocking(move || {
        monitor.sample();
        MonitorResponse {
            descriptor_id: monitor.descriptor_id().to_string(),
            samples: monitor.samples(),
            vote: monitor.scale_status(query.worker_count).vote,
        }
    })
    .await
    .map(Json)
    .map_err(|e| {
        error!("Scale monitor task failed: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

pub async fn scale_target(
    State(state): State<AppState>,
    Query(context): Query<TargetScalerContext>,
) -> ApiResult<TargetScalerResult> {
    let scaler = state.target_scaler.clone();
    let registry = state.registry.clone();
    let result = tokio::task::spawn_blocking(move || registry.evaluate(&scaler, &context))
        .await
        .map_err(|e| {
            error!("Target scaler task failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    result
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(readiness))
        .route("/_liveness", get(|| std::future::ready("ok")))
        .route("/scale/monitor", get(scale_monitor))
        .route("/scale/target", get(scale_target))
        .with_state(state)
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Result<Router> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 50.0, 100.0, 250.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .context("Invalid histogram buckets")?
        .install_recorder()
        .context("Failed to install prometheus recorder")
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

/// Bind a `TcpListener` on the provided bind address and serve the router on it
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}
