//! Service configuration from command-line flags and environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use storage::ObjectStorageConfig;
use webshot_common::{Dimension, OutputFormat, ShotError, ShotResult};

#[derive(Parser, Debug, Clone)]
#[command(name = "webshot-api")]
#[command(about = "Renders web pages to images and delivers them inline, by webhook or via object storage")]
pub struct Args {
    /// Listen address
    #[arg(short, long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Port the renderer listens on
    #[arg(long, env = "RENDERER_PORT", default_value_t = 3001)]
    pub renderer_port: u16,

    #[arg(long, env = "RENDERER_HOST", default_value = "127.0.0.1")]
    pub renderer_host: String,

    /// Directory render files are written to
    #[arg(long, env = "RENDER_DIR", default_value = "/tmp/webshot/")]
    pub render_dir: PathBuf,

    /// Renderer executable; when unset the renderer is managed externally
    #[arg(long, env = "RENDERER_COMMAND")]
    pub renderer_command: Option<String>,

    /// Script handed to the renderer executable
    #[arg(long, env = "RENDERER_SCRIPT", default_value = "scripts/rasterizer.js")]
    pub renderer_script: PathBuf,

    /// Renderer viewport as WIDTHxHEIGHT
    #[arg(long, env = "DEFAULT_VIEWPORT", default_value = "1024x600")]
    pub default_viewport: String,

    #[arg(long, env = "RENDER_TIMEOUT_SECS", default_value_t = 60)]
    pub render_timeout_secs: u64,

    /// Renderer health probe period (0 disables the watchdog)
    #[arg(long, env = "RENDERER_HEALTH_INTERVAL_SECS", default_value_t = 30)]
    pub health_interval_secs: u64,

    /// png or jpeg
    #[arg(long, env = "OUTPUT_FORMAT", default_value = "png")]
    pub output_format: String,

    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value_t = StorageBackend::S3)]
    pub storage_backend: StorageBackend,

    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,

    /// Endpoint for S3-compatible stores such as MinIO
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, env = "S3_ACCESS_KEY")]
    pub s3_access_key: Option<String>,

    #[arg(long, env = "S3_SECRET_KEY", hide_env_values = true)]
    pub s3_secret_key: Option<String>,

    /// Key prefix for published objects
    #[arg(long, env = "STORAGE_PREFIX", default_value = "screenshots")]
    pub storage_prefix: String,

    /// Host (or base URL) in public object URLs
    #[arg(long, env = "STORAGE_PUBLIC_HOST", default_value = "s3.amazonaws.com")]
    pub storage_public_host: String,

    #[arg(long, env = "WEBHOOK_TIMEOUT_SECS", default_value_t = 30)]
    pub webhook_timeout_secs: u64,

    /// Post a failure payload to the callback when an async request fails
    #[arg(long, env = "NOTIFY_FAILURES", default_value_t = false)]
    pub notify_failures: bool,

    /// Keep render files this long for identical requests (0 disables)
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 0)]
    pub cache_ttl_secs: u64,

    /// Add permissive CORS headers
    #[arg(long = "cors", env = "ENABLE_CORS", default_value_t = false)]
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// AWS S3 through the AWS SDK, public-read ACL
    S3,
    /// S3-compatible endpoint (S3_ENDPOINT) through the AWS SDK, path-style
    Minio,
    /// Process-local store, nothing leaves the machine
    Memory,
}

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub host: String,
    pub port: u16,
    pub render_dir: PathBuf,
    pub command: Option<String>,
    pub script: PathBuf,
    pub viewport: Dimension,
    pub timeout: Duration,
    /// `None` disables the watchdog.
    pub health_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub object_store: ObjectStorageConfig,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub format: OutputFormat,
    pub webhook_timeout: Duration,
    pub notify_failures: bool,
    /// `None` deletes render files as soon as they are delivered.
    pub cache_ttl: Option<Duration>,
    pub cors: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen: SocketAddr,
    pub renderer: RendererConfig,
    pub storage: StorageConfig,
    pub delivery: DeliveryConfig,
}

impl AppConfig {
    pub fn from_args(args: &Args) -> ShotResult<Self> {
        let listen = args
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| ShotError::Config(format!("Invalid listen address '{}': {}", args.listen, e)))?;
        let viewport = Dimension::parse_viewport(&args.default_viewport)
            .map_err(|e| ShotError::Config(e.to_string()))?;
        let format = args
            .output_format
            .parse::<OutputFormat>()
            .map_err(|e| ShotError::Config(e.to_string()))?;

        let config = Self {
            listen,
            renderer: RendererConfig {
                host: args.renderer_host.clone(),
                port: args.renderer_port,
                render_dir: args.render_dir.clone(),
                command: args.renderer_command.clone().filter(|c| !c.trim().is_empty()),
                script: args.renderer_script.clone(),
                viewport,
                timeout: Duration::from_secs(args.render_timeout_secs),
                health_interval: nonzero_secs(args.health_interval_secs),
            },
            storage: StorageConfig {
                backend: args.storage_backend,
                object_store: ObjectStorageConfig {
                    endpoint: args.s3_endpoint.clone(),
                    bucket: args.s3_bucket.clone().unwrap_or_default(),
                    access_key_id: args.s3_access_key.clone(),
                    secret_access_key: args.s3_secret_key.clone(),
                    region: args.s3_region.clone(),
                    public_host: args.storage_public_host.clone(),
                },
                prefix: args.storage_prefix.clone(),
            },
            delivery: DeliveryConfig {
                format,
                webhook_timeout: Duration::from_secs(args.webhook_timeout_secs),
                notify_failures: args.notify_failures,
                cache_ttl: nonzero_secs(args.cache_ttl_secs),
                cors: args.enable_cors,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ShotResult<()> {
        if self.renderer.port == 0 {
            return Err(ShotError::Config("Renderer port must not be 0".to_string()));
        }
        if self.renderer.viewport.width == 0 || self.renderer.viewport.height == 0 {
            return Err(ShotError::Config("Viewport must not be empty".to_string()));
        }
        if self.renderer.timeout.is_zero() {
            return Err(ShotError::Config("Render timeout must not be 0".to_string()));
        }
        match self.storage.backend {
            StorageBackend::S3 | StorageBackend::Minio
                if self.storage.object_store.bucket.trim().is_empty() =>
            {
                Err(ShotError::Config(
                    "S3_BUCKET is required for the s3 and minio storage backends".to_string(),
                ))
            }
            StorageBackend::Minio if self.storage.object_store.endpoint.is_none() => Err(
                ShotError::Config("S3_ENDPOINT is required for the minio storage backend".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            renderer: RendererConfig {
                host: "127.0.0.1".to_string(),
                port: 3001,
                render_dir: PathBuf::from("/tmp/webshot/"),
                command: None,
                script: PathBuf::from("scripts/rasterizer.js"),
                viewport: Dimension::new(1024, 600),
                timeout: Duration::from_secs(60),
                health_interval: Some(Duration::from_secs(30)),
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                object_store: ObjectStorageConfig::default(),
                prefix: "screenshots".to_string(),
            },
            delivery: DeliveryConfig {
                format: OutputFormat::Png,
                webhook_timeout: Duration::from_secs(30),
                notify_failures: false,
                cache_ttl: None,
                cors: false,
            },
        }
    }
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then_some(Duration::from_secs(secs))
}
