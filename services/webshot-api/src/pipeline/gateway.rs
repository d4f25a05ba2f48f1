//! One-shot calls to the renderer with restart-on-failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use webshot_common::{ShotError, ShotResult};

use crate::metrics;
use crate::renderer::{RenderJob, Renderer};

/// Bounds each render call and flags the renderer for restart when one fails.
///
/// A failed call is never retried: the restart runs in the background and
/// only prepares the renderer for later requests, so the caller gets its
/// error without waiting for a respawn.
pub struct RenderingGateway {
    renderer: Arc<dyn Renderer>,
    timeout: Duration,
}

impl RenderingGateway {
    pub fn new(renderer: Arc<dyn Renderer>, timeout: Duration) -> Self {
        Self { renderer, timeout }
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    #[instrument(skip(self, job), fields(url = %job.url, filename = %job.filename))]
    pub async fn render(&self, job: &RenderJob) -> ShotResult<()> {
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.renderer.capture(job)).await {
            Ok(result) => result,
            Err(_) => Err(ShotError::RenderTimeout(self.timeout.as_secs())),
        };
        let elapsed = start.elapsed();
        metrics::record_render(elapsed, result.is_ok());

        match result {
            Ok(message) => {
                info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    response = %message,
                    "Render complete"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "Render failed");
                let renderer = Arc::clone(&self.renderer);
                tokio::spawn(async move {
                    if let Err(restart_err) = renderer.restart().await {
                        error!(error = %restart_err, "Renderer restart failed");
                    }
                });
                Err(e)
            }
        }
    }
}
