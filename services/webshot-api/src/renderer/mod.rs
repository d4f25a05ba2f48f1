//! Boundary to the external page renderer.
//!
//! The renderer is a separate process that accepts one capture per HTTP call
//! and writes the image to a path it shares with this service. Everything
//! the pipeline needs from it goes through the [`Renderer`] trait so tests
//! can substitute a fake.

pub mod http;
pub mod process;

use std::path::PathBuf;

use async_trait::async_trait;

use webshot_common::{ArtifactPaths, RenderRequest, ShotResult};

pub use self::http::HttpRenderer;
pub use self::process::{ProcessConfig, RendererProcess};

/// One capture handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub url: String,
    /// File name relative to the renderer's base directory.
    pub filename: String,
    /// Where the rendered file is expected to appear locally.
    pub output_path: PathBuf,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Option metadata forwarded verbatim (clipRect, delay, userAgent, ...).
    pub metadata: Vec<(String, String)>,
}

impl RenderJob {
    pub fn new(request: &RenderRequest, paths: &ArtifactPaths) -> Self {
        Self {
            url: request.url.to_string(),
            filename: paths.file_name.clone(),
            output_path: paths.local_path.clone(),
            width: request.width,
            height: request.height,
            metadata: request.options.metadata(),
        }
    }

    /// Every header sent to the renderer, in a stable order.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("url".to_string(), self.url.clone()),
            ("filename".to_string(), self.filename.clone()),
        ];
        if let Some(w) = self.width {
            headers.push(("width".to_string(), w.to_string()));
        }
        if let Some(h) = self.height {
            headers.push(("height".to_string(), h.to_string()));
        }
        // Computed headers win; a duplicate would reach the renderer as a second value.
        let extra: Vec<_> = self
            .metadata
            .iter()
            .filter(|(name, _)| !headers.iter().any(|(fixed, _)| fixed.eq_ignore_ascii_case(name)))
            .cloned()
            .collect();
        headers.extend(extra);
        headers
    }
}

/// Capability over a long-lived, restartable renderer.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render one job. `Ok` carries the renderer's success message.
    async fn capture(&self, job: &RenderJob) -> ShotResult<String>;

    /// Bring a possibly wedged renderer back to a state where the next capture can succeed.
    async fn restart(&self) -> ShotResult<()>;

    /// Whether the renderer currently answers its health check.
    async fn health_check(&self) -> bool;
}
