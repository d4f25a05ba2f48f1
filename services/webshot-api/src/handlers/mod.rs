//! HTTP request handlers.
//!
//! - `snapshot`: the render endpoint, usage text and legacy path redirects
//! - `health`: liveness, renderer health and Prometheus metrics

pub mod health;
pub mod snapshot;

pub use health::{health_handler, metrics_handler, renderer_health_handler};
pub use snapshot::{fallback_handler, snapshot_handler, usage_handler};
