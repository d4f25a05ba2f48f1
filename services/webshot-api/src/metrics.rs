//! Prometheus metrics for the render pipeline.
//!
//! Thin wrappers over the `metrics` facade so metric names live in one place.
//! Without an installed recorder every call is a no-op, which is what tests get.

use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Delivery mode of an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sync,
    Async,
}

impl Mode {
    fn label(self) -> &'static str {
        match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        }
    }
}

fn result_label(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

pub fn record_request(mode: Mode) {
    counter!("webshot_requests_total", "mode" => mode.label()).increment(1);
}

pub fn record_render(elapsed: Duration, ok: bool) {
    histogram!("webshot_render_duration_seconds").record(elapsed.as_secs_f64());
    if !ok {
        counter!("webshot_render_failures_total").increment(1);
    }
}

pub fn record_renderer_restart() {
    counter!("webshot_renderer_restarts_total").increment(1);
}

pub fn record_upload(ok: bool) {
    counter!("webshot_uploads_total", "result" => result_label(ok)).increment(1);
}

pub fn record_publish(elapsed: Duration) {
    histogram!("webshot_publish_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_webhook(ok: bool) {
    counter!("webshot_webhooks_total", "result" => result_label(ok)).increment(1);
}

pub fn record_local_io_error() {
    counter!("webshot_local_io_errors_total").increment(1);
}
