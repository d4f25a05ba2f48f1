//! Shared harness for webshot-api integration tests.
//!
//! Provides:
//! - `FakeRenderer`, an in-process `Renderer` that writes PNG fixtures
//! - `Harness`, an `AppState` wired to the fake and an in-memory store

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use storage::ObjectStorage;
use test_utils::fixtures::{png_bytes, DEFAULT_VIEWPORT};
use webshot_api::config::AppConfig;
use webshot_api::renderer::{RenderJob, Renderer};
use webshot_api::state::AppState;
use webshot_common::{ShotError, ShotResult};

pub const BUCKET: &str = "shots";
pub const PUBLIC_HOST: &str = "s3.amazonaws.com";

#[derive(Debug, Clone, PartialEq)]
pub enum FakeMode {
    Succeed,
    Fail(String),
    Hang,
    /// Succeed after a delay, like a page that takes a while to load.
    Slow(Duration),
}

/// Renderer double: counts calls and writes a gradient PNG sized like the job.
pub struct FakeRenderer {
    mode: Mutex<FakeMode>,
    captures: AtomicUsize,
    restarts: AtomicUsize,
    jobs: Mutex<Vec<RenderJob>>,
}

impl FakeRenderer {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            captures: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<RenderJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn capture(&self, job: &RenderJob) -> ShotResult<String> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().push(job.clone());

        let mode = self.mode.lock().unwrap().clone();
        if let FakeMode::Slow(delay) = mode {
            tokio::time::sleep(delay).await;
        }
        match mode {
            FakeMode::Succeed | FakeMode::Slow(_) => {
                let width = job.width.unwrap_or(DEFAULT_VIEWPORT.0);
                let height = job.height.unwrap_or(DEFAULT_VIEWPORT.1);
                tokio::fs::write(&job.output_path, png_bytes(width, height)).await?;
                Ok(format!("Success: Screenshot saved to {}", job.output_path.display()))
            }
            FakeMode::Fail(message) => {
                // Leave a partial file behind, as a crashed renderer might.
                tokio::fs::write(&job.output_path, b"partial").await?;
                Err(ShotError::RenderFailed(message))
            }
            FakeMode::Hang => std::future::pending().await,
        }
    }

    async fn restart(&self) -> ShotResult<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        !matches!(*self.mode.lock().unwrap(), FakeMode::Hang)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub renderer: Arc<FakeRenderer>,
    pub store: Arc<ObjectStorage>,
    pub state: Arc<AppState>,
}

impl Harness {
    pub fn new(mode: FakeMode) -> Self {
        Self::with_config(mode, |_| {})
    }

    pub fn with_config(mode: FakeMode, configure: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut config = AppConfig::default();
        config.renderer.render_dir = dir.path().to_path_buf();
        config.renderer.timeout = Duration::from_secs(5);
        config.storage.object_store.bucket = BUCKET.to_string();
        config.delivery.webhook_timeout = Duration::from_secs(5);
        configure(&mut config);

        let renderer = Arc::new(FakeRenderer::new(mode));
        let store = Arc::new(ObjectStorage::in_memory(BUCKET, PUBLIC_HOST));
        let state =
            AppState::from_parts(config, renderer.clone(), store.clone(), None).unwrap();

        Self {
            dir,
            renderer,
            store,
            state: Arc::new(state),
        }
    }

    /// Files currently in the render directory.
    pub fn render_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Wait for restarts triggered in the background, then check the exact count.
    pub async fn wait_for_restarts(&self, expected: usize) {
        for _ in 0..100 {
            if self.renderer.restarts() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(self.renderer.restarts(), expected);
    }

    /// Wait until the render directory is empty.
    pub async fn wait_for_cleanup(&self) {
        for _ in 0..100 {
            if self.render_files().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("render files left behind: {:?}", self.render_files());
    }
}

pub fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
