//! Health checks and Prometheus metrics.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::state::AppState;

/// GET /health - Basic health check
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /health/renderer - whether the renderer answers its own health check
pub async fn renderer_health_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    if state.renderer.health_check().await {
        (StatusCode::OK, "up")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "down")
    }
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        handle.render(),
    )
}
