//! Supervision of a locally spawned renderer process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use webshot_common::{Dimension, ShotError, ShotResult};

use super::http::probe_health;
use crate::metrics;

/// How to launch the renderer.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Executable, e.g. `phantomjs` or `node`.
    pub command: String,
    /// Script passed as the first argument.
    pub script: PathBuf,
    /// Directory the renderer writes files into.
    pub render_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub viewport: Dimension,
    /// Health probes to wait for after a spawn.
    pub ready_attempts: u32,
    pub ready_interval: Duration,
}

impl ProcessConfig {
    fn args(&self) -> Vec<String> {
        // The renderer joins its base path and the filename header without a separator.
        let mut base = self.render_dir.to_string_lossy().into_owned();
        if !base.ends_with('/') {
            base.push('/');
        }
        vec![
            self.script.to_string_lossy().into_owned(),
            base,
            self.port.to_string(),
            format!("{}x{}", self.viewport.width, self.viewport.height),
        ]
    }
}

struct Running {
    child: Child,
    started_at: DateTime<Utc>,
}

/// Owns the renderer child process and restarts it on demand.
pub struct RendererProcess {
    config: ProcessConfig,
    client: Client,
    base_url: String,
    /// Held across a whole restart; restarts run one at a time.
    running: Mutex<Option<Running>>,
    /// Completed restarts. Callers that queued behind a restart skip their own.
    restarts: AtomicU64,
}

impl RendererProcess {
    pub fn new(config: ProcessConfig) -> ShotResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ShotError::Config(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = format!("http://{}:{}", config.host, config.port);

        Ok(Self {
            config,
            client,
            base_url,
            running: Mutex::new(None),
            restarts: AtomicU64::new(0),
        })
    }

    /// Spawn the renderer and wait until it answers its health check.
    pub async fn start(&self) -> ShotResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        *running = Some(self.spawn()?);
        drop(running);
        self.wait_ready().await
    }

    /// Kill the current process (if any) and start a fresh one.
    ///
    /// A call that had to wait for another restart to finish returns without
    /// spawning again.
    pub async fn restart(&self) -> ShotResult<()> {
        let seen = self.restarts.load(Ordering::Acquire);
        let mut running = self.running.lock().await;
        if self.restarts.load(Ordering::Acquire) != seen {
            debug!("Renderer was restarted while waiting, skipping");
            return Ok(());
        }
        if let Some(mut old) = running.take() {
            let pid = old.child.id();
            if let Err(e) = old.child.kill().await {
                warn!(pid = ?pid, error = %e, "Failed to kill renderer");
            }
            info!(
                pid = ?pid,
                uptime_secs = (Utc::now() - old.started_at).num_seconds(),
                "Renderer stopped"
            );
        }
        *running = Some(self.spawn()?);

        metrics::record_renderer_restart();

        // Keep the lock until the new process is ready so callers queue behind it.
        let result = self.wait_ready().await;
        self.restarts.fetch_add(1, Ordering::Release);
        drop(running);
        result
    }

    pub async fn health_check(&self) -> bool {
        probe_health(&self.client, &self.base_url).await
    }

    /// Number of restarts since construction.
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }

    /// PID of the running child, if one is alive.
    pub async fn pid(&self) -> Option<u32> {
        self.running.lock().await.as_ref().and_then(|r| r.child.id())
    }

    /// Stop the child process.
    pub async fn shutdown(&self) {
        if let Some(mut old) = self.running.lock().await.take() {
            if let Err(e) = old.child.kill().await {
                warn!(error = %e, "Failed to kill renderer on shutdown");
            }
        }
    }

    /// Periodically probe the renderer and restart it when unhealthy.
    pub fn spawn_watchdog(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if self.health_check().await {
                    continue;
                }
                warn!(renderer = %self.base_url, "Renderer failed health check, restarting");
                if let Err(e) = self.restart().await {
                    error!(error = %e, "Renderer restart from watchdog failed");
                }
            }
        })
    }

    fn spawn(&self) -> ShotResult<Running> {
        let args = self.config.args();
        let child = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ShotError::RenderFailed(format!(
                    "Failed to spawn renderer '{}': {}",
                    self.config.command, e
                ))
            })?;

        info!(
            pid = ?child.id(),
            command = %self.config.command,
            args = ?args,
            "Renderer started"
        );

        Ok(Running {
            child,
            started_at: Utc::now(),
        })
    }

    async fn wait_ready(&self) -> ShotResult<()> {
        for _ in 0..self.config.ready_attempts.max(1) {
            if self.health_check().await {
                return Ok(());
            }
            tokio::time::sleep(self.config.ready_interval).await;
        }
        Err(ShotError::RenderFailed(format!(
            "Renderer at {} did not become healthy",
            self.base_url
        )))
    }
}
