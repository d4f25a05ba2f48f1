//! The render-request pipeline.
//!
//! A request is resolved to its fingerprinted artifact, rendered through the
//! [`RenderingGateway`] and then delivered one of three ways:
//!
//! - no callback: the file is streamed back as the response body;
//! - callback: the caller is acknowledged at once, then the raw file is
//!   POSTed to the callback;
//! - callback with publishing: every variant is uploaded to object storage
//!   and the callback receives a JSON payload describing the uploads.

pub mod body;
pub mod gateway;
pub mod lifecycle;
pub mod notifier;
pub mod publisher;
pub mod resize;

use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::File;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;

use webshot_common::{ArtifactPaths, PathResolver, RenderRequest, ShotError, ShotResult};

use crate::metrics::{self, Mode};
use crate::renderer::RenderJob;

pub use self::body::TempFileBody;
pub use self::gateway::RenderingGateway;
pub use self::lifecycle::{FileLifecycle, FingerprintGuard, FingerprintLocks};
pub use self::notifier::{WebhookNotifier, WebhookPayload};
pub use self::publisher::{AssetPublisher, PublishReport, VariantFailure, VariantUpload};

/// What the original caller gets back.
pub enum Delivery {
    /// Rendered file, streamed as the response body.
    Inline {
        body: TempFileBody,
        content_type: &'static str,
        content_length: u64,
    },
    /// Work continues in the background; the callback will be notified.
    Accepted { message: String },
}

/// Terminal state of an asynchronous run.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Raw file POSTed to the callback.
    Posted,
    /// JSON payload POSTed to the callback after publishing.
    Notified(WebhookPayload),
}

pub struct Pipeline {
    resolver: PathResolver,
    gateway: RenderingGateway,
    publisher: AssetPublisher,
    notifier: WebhookNotifier,
    lifecycle: Arc<FileLifecycle>,
    /// Send a failure payload to the callback when an async run fails.
    notify_failures: bool,
}

impl Pipeline {
    pub fn new(
        resolver: PathResolver,
        gateway: RenderingGateway,
        publisher: AssetPublisher,
        notifier: WebhookNotifier,
        lifecycle: Arc<FileLifecycle>,
        notify_failures: bool,
    ) -> Self {
        Self {
            resolver,
            gateway,
            publisher,
            notifier,
            lifecycle,
            notify_failures,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn gateway(&self) -> &RenderingGateway {
        &self.gateway
    }

    pub fn lifecycle(&self) -> &Arc<FileLifecycle> {
        &self.lifecycle
    }

    /// Run a validated request. The delivery mode is chosen here, once.
    pub async fn dispatch(self: &Arc<Self>, request: RenderRequest) -> ShotResult<Delivery> {
        let paths = self.resolver.resolve(&request);
        let span = info_span!(
            "render_request",
            fingerprint = %paths.fingerprint,
            url = %request.url,
            correlation_id = request.correlation_id.as_deref().unwrap_or(""),
        );

        match request.callback.clone() {
            None => {
                metrics::record_request(Mode::Sync);
                // Runs detached from the caller: a client that hangs up must not
                // abandon a render the renderer will still write to disk.
                let pipeline = Arc::clone(self);
                tokio::spawn(
                    async move { pipeline.deliver_inline(&request, &paths).await }.instrument(span),
                )
                .await
                .map_err(|e| ShotError::Internal(format!("Render task failed: {}", e)))?
            }
            Some(callback) => {
                metrics::record_request(Mode::Async);
                let message = format!("Will post screenshot to {} when processed", callback);

                let pipeline = Arc::clone(self);
                tokio::spawn(
                    async move { pipeline.run_async(request, paths, callback).await }
                        .instrument(span),
                );

                Ok(Delivery::Accepted { message })
            }
        }
    }

    async fn deliver_inline(
        &self,
        request: &RenderRequest,
        paths: &ArtifactPaths,
    ) -> ShotResult<Delivery> {
        let guard = self.produce(request, paths).await?;

        let opened = async {
            let file = File::open(&paths.local_path).await?;
            let len = file.metadata().await?.len();
            Ok::<_, std::io::Error>((file, len))
        }
        .await;

        match opened {
            Ok((file, content_length)) => Ok(Delivery::Inline {
                body: TempFileBody::new(
                    file,
                    paths.local_path.clone(),
                    Arc::clone(&self.lifecycle),
                    guard,
                ),
                content_type: paths.format.content_type(),
                content_length,
            }),
            Err(e) => {
                metrics::record_local_io_error();
                self.lifecycle.release(&paths.local_path, guard).await;
                Err(e.into())
            }
        }
    }

    async fn run_async(self: Arc<Self>, request: RenderRequest, paths: ArtifactPaths, callback: Url) {
        match self.deliver_async(&request, &paths, &callback).await {
            Ok(DeliveryOutcome::Posted) => info!("Posted render to callback"),
            Ok(DeliveryOutcome::Notified(_)) => info!("Notified callback of published render"),
            Err(e) => self.report_failure(&request, &callback, &e).await,
        }
    }

    /// Render, then post or publish-and-notify. Runs after the caller was acknowledged.
    pub async fn deliver_async(
        &self,
        request: &RenderRequest,
        paths: &ArtifactPaths,
        callback: &Url,
    ) -> ShotResult<DeliveryOutcome> {
        let guard = self.produce(request, paths).await?;

        if !request.publish {
            let result = self
                .notifier
                .post_file(callback, &paths.local_path, paths.format.content_type())
                .await;
            self.lifecycle.release(&paths.local_path, guard).await;
            return result.map(|_| DeliveryOutcome::Posted);
        }

        // Every variant is produced from this buffer, so the file can go once it is read.
        let data = match tokio::fs::read(&paths.local_path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                metrics::record_local_io_error();
                self.lifecycle.release(&paths.local_path, guard).await;
                return Err(e.into());
            }
        };

        let report = self.publisher.publish(request, paths, data).await;
        self.lifecycle.release(&paths.local_path, guard).await;

        let payload = WebhookPayload::published(request, report?);
        self.notifier.deliver(callback, &payload).await?;
        Ok(DeliveryOutcome::Notified(payload))
    }

    /// Error channel for async runs: always logged, optionally sent to the callback.
    async fn report_failure(&self, request: &RenderRequest, callback: &Url, err: &ShotError) {
        error!(error = %err, callback = %callback, "Asynchronous render request failed");

        // A callback that just rejected a delivery is not sent a second one.
        if !self.notify_failures || matches!(err, ShotError::NotifyFailed(_)) {
            return;
        }
        let payload = WebhookPayload::failure(request, err);
        if let Err(e) = self.notifier.deliver(callback, &payload).await {
            warn!(error = %e, "Failure notification was not delivered");
        }
    }

    /// Make sure the render file exists, rendering it if needed.
    ///
    /// Returns the fingerprint guard that the file's last consumer must release.
    async fn produce(
        &self,
        request: &RenderRequest,
        paths: &ArtifactPaths,
    ) -> ShotResult<FingerprintGuard> {
        let guard = self.lifecycle.locks().acquire(&paths.fingerprint).await;

        if self.lifecycle.caching() && tokio::fs::try_exists(&paths.local_path).await.unwrap_or(false) {
            debug!(path = %paths.local_path.display(), "Cache hit, skipping render");
            return Ok(guard);
        }

        let job = RenderJob::new(request, paths);
        if let Err(e) = self.gateway.render(&job).await {
            // Partial output must not outlive a failed render.
            self.lifecycle.discard(&paths.local_path).await;
            return Err(e);
        }
        Ok(guard)
    }
}
