//! HTTP server for the bundle-building service.
//!
//! Provides endpoints for:
//! - `POST /internal/bundles` - build (or rebuild) one plan's offline bundle
//! - `GET /healthz` - health check
//! - `GET /metrics` - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use roam_common::config::RoamConfig;
use roam_common::contracts::{NavRequest, PlaceCategory};
use roam_orchestrator::{BundleBuildRequest, BundleOrchestrator};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Shared state for the HTTP server.
pub struct ServerState {
    pub orchestrator: BundleOrchestrator,
    pub config: RoamConfig,
    pub metrics_handle: PrometheusHandle,
}

/// Request body for `POST /internal/bundles`.
#[derive(Debug, Deserialize)]
pub struct BuildBundleRequest {
    pub plan_id: String,
    pub nav_request: NavRequest,
    #[serde(default)]
    pub categories: Vec<PlaceCategory>,
    pub buffer_m: Option<u32>,
    pub max_edges: Option<u32>,
}

/// Response body for `POST /internal/bundles`.
#[derive(Debug, Serialize)]
pub struct BuildBundleResponse {
    pub success: bool,
    pub plan_id: String,
    pub total_bytes: usize,
    pub message: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// `POST /internal/bundles` - build a plan's offline bundle end to end.
async fn build_bundle_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Json(request): Json<BuildBundleRequest>,
) -> impl IntoResponse {
    let started = std::time::Instant::now();
    let build_req = BundleBuildRequest {
        plan_id: request.plan_id.clone(),
        nav_request: request.nav_request,
        categories: request.categories,
        buffer_m: request
            .buffer_m
            .unwrap_or(state.config.corridor_buffer_m_default),
        max_edges: request
            .max_edges
            .unwrap_or(state.config.corridor_max_edges_default),
    };

    info!(plan_id = %request.plan_id, "bundle build requested");
    counter!("bundle_build_requests_total").increment(1);

    match state.orchestrator.build(&state.config, &build_req).await {
        Ok(manifest) => {
            histogram!("bundle_build_duration_seconds").record(started.elapsed().as_secs_f64());
            info!(
                plan_id = %request.plan_id,
                total_bytes = manifest.total_bytes,
                "bundle build completed"
            );
            (
                StatusCode::OK,
                Json(BuildBundleResponse {
                    success: true,
                    plan_id: request.plan_id,
                    total_bytes: manifest.total_bytes,
                    message: "bundle built".to_string(),
                }),
            )
        }
        Err(e) => {
            counter!("bundle_build_errors_total").increment(1);
            error!(plan_id = %request.plan_id, error = %e, "bundle build failed");
            let status = StatusCode::from_u16(e.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                Json(BuildBundleResponse {
                    success: false,
                    plan_id: request.plan_id,
                    total_bytes: 0,
                    message: e.to_string(),
                }),
            )
        }
    }
}

/// `GET /healthz` - liveness/readiness probe.
async fn healthz_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "bundle-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /metrics` - Prometheus text exposition.
async fn metrics_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    state.metrics_handle.render()
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/internal/bundles", post(build_bundle_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// Start the HTTP server.
pub async fn start_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "starting bundle-service HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
