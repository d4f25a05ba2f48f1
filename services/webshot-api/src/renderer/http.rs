//! HTTP client for the renderer's capture protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use webshot_common::{ShotError, ShotResult};

use super::{RenderJob, Renderer, RendererProcess};

/// Marker the renderer writes into a 200 body when the page itself failed.
const ERROR_MARKER: &str = "Error:";

/// Talks to a renderer listening on a local port.
pub struct HttpRenderer {
    client: Client,
    base_url: String,
    /// Present when this service supervises the renderer process.
    process: Option<Arc<RendererProcess>>,
}

impl HttpRenderer {
    pub fn new(host: &str, port: u16, process: Option<Arc<RendererProcess>>) -> ShotResult<Self> {
        // No request timeout here; the gateway bounds each call.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ShotError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", host, port),
            process,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    #[instrument(skip(self, job), fields(url = %job.url, filename = %job.filename))]
    async fn capture(&self, job: &RenderJob) -> ShotResult<String> {
        let mut request = self.client.get(format!("{}/", self.base_url));
        for (name, value) in job.headers() {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ShotError::RenderFailed(format!("Renderer request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ShotError::RenderFailed(format!("Failed to read renderer response: {}", e)))?;
        let body = body.trim();

        if status != StatusCode::OK {
            let detail = if body.is_empty() { status.to_string() } else { body.to_string() };
            return Err(ShotError::RenderFailed(detail));
        }

        // The page load can fail after the renderer has already committed to 200.
        if let Some(pos) = body.find(ERROR_MARKER) {
            return Err(ShotError::RenderFailed(body[pos..].trim().to_string()));
        }

        match tokio::fs::try_exists(&job.output_path).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ShotError::RenderFailed(format!(
                    "Renderer reported success but {} does not exist",
                    job.output_path.display()
                )))
            }
            Err(e) => return Err(ShotError::LocalIo(e.to_string())),
        }

        debug!(response = %body, "Renderer finished");
        Ok(body.to_string())
    }

    async fn restart(&self) -> ShotResult<()> {
        match &self.process {
            Some(process) => process.restart().await,
            None => {
                warn!(renderer = %self.base_url, "Renderer is externally managed, skipping restart");
                Ok(())
            }
        }
    }

    async fn health_check(&self) -> bool {
        match &self.process {
            Some(process) => process.health_check().await,
            None => probe_health(&self.client, &self.base_url).await,
        }
    }
}

/// GET `/healthCheck`; healthy means 200 with body `up`.
pub(crate) async fn probe_health(client: &Client, base_url: &str) -> bool {
    let response = match client
        .get(format!("{}/healthCheck", base_url))
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "Renderer health check failed");
            return false;
        }
    };

    if response.status() != StatusCode::OK {
        return false;
    }
    matches!(response.text().await, Ok(body) if body.trim() == "up")
}
