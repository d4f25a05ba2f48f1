//! Web page screenshot service.
//!
//! Renders pages through an external renderer process and delivers the
//! image inline, to a callback URL, or as published object-storage variants.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod renderer;
pub mod state;

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::header,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

/// Build the HTTP router. `/metrics` is only mounted when a recorder handle is given.
pub fn build_router(state: Arc<AppState>, prometheus: Option<PrometheusHandle>) -> Router {
    let cors = state.config.delivery.cors;

    let mut app = Router::new()
        .route("/", get(handlers::snapshot_handler))
        .route("/usage.html", get(handlers::usage_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/renderer", get(handlers::renderer_health_handler));

    if let Some(handle) = prometheus {
        app = app
            .route("/metrics", get(handlers::metrics_handler))
            .layer(Extension(handle));
    }

    let app = app
        .fallback(handlers::fallback_handler)
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    if cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([header::CONTENT_TYPE]),
        )
    } else {
        app
    }
}
