//! Application state shared across handlers.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use storage::{AssetStore, ObjectStorage, S3Storage};
use webshot_common::{PathResolver, ShotResult};

use crate::config::{AppConfig, StorageBackend};
use crate::pipeline::{
    AssetPublisher, FileLifecycle, FingerprintLocks, Pipeline, RenderingGateway, WebhookNotifier,
};
use crate::renderer::{HttpRenderer, ProcessConfig, Renderer, RendererProcess};

/// Shared application state.
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<Pipeline>,
    pub renderer: Arc<dyn Renderer>,
    /// Set when this service spawned the renderer itself.
    pub process: Option<Arc<RendererProcess>>,
}

impl AppState {
    /// Build state from configuration, connecting to the configured storage backend.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let process = match &config.renderer.command {
            Some(command) => {
                let renderer = &config.renderer;
                Some(Arc::new(RendererProcess::new(ProcessConfig {
                    command: command.clone(),
                    script: renderer.script.clone(),
                    render_dir: renderer.render_dir.clone(),
                    host: renderer.host.clone(),
                    port: renderer.port,
                    viewport: renderer.viewport,
                    ready_attempts: 50,
                    ready_interval: std::time::Duration::from_millis(200),
                })?))
            }
            None => None,
        };

        let renderer: Arc<dyn Renderer> = Arc::new(HttpRenderer::new(
            &config.renderer.host,
            config.renderer.port,
            process.clone(),
        )?);

        let object_config = &config.storage.object_store;
        let store: Arc<dyn AssetStore> = match config.storage.backend {
            StorageBackend::S3 | StorageBackend::Minio => {
                Arc::new(S3Storage::connect(object_config).await)
            }
            StorageBackend::Memory => Arc::new(ObjectStorage::in_memory(
                &object_config.bucket,
                &object_config.public_host,
            )),
        };
        info!(
            backend = ?config.storage.backend,
            bucket = %object_config.bucket,
            "Storage initialized"
        );

        Ok(Self::from_parts(config, renderer, store, process)?)
    }

    /// Assemble state around an already constructed renderer and store.
    pub fn from_parts(
        config: AppConfig,
        renderer: Arc<dyn Renderer>,
        store: Arc<dyn AssetStore>,
        process: Option<Arc<RendererProcess>>,
    ) -> ShotResult<Self> {
        let locks = Arc::new(FingerprintLocks::new());
        let lifecycle = Arc::new(FileLifecycle::new(locks, config.delivery.cache_ttl));

        let pipeline = Pipeline::new(
            PathResolver::new(&config.renderer.render_dir, config.delivery.format),
            RenderingGateway::new(Arc::clone(&renderer), config.renderer.timeout),
            AssetPublisher::new(store, config.storage.prefix.clone()),
            WebhookNotifier::new(config.delivery.webhook_timeout)?,
            lifecycle,
            config.delivery.notify_failures,
        );

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            renderer,
            process,
        })
    }
}
