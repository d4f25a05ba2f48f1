//! Throwaway HTTP servers for integration tests.
//!
//! Both servers bind `127.0.0.1:0` and run on the current tokio runtime, so
//! they live exactly as long as the test that started them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::fixtures::{png_bytes, DEFAULT_VIEWPORT};

/// Serve `router` on an ephemeral local port and return its address.
pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

// ============================================================================
// Fake renderer
// ============================================================================

/// How the fake renderer answers capture requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererBehavior {
    /// Write a PNG to `<base_dir>/<filename>` and answer `Success: ...`.
    Succeed,
    /// Answer 200 with an `Error:` marker and write nothing.
    EmbeddedError,
    /// Answer 500.
    ServerError,
    /// Never answer.
    Hang,
}

struct FakeRendererState {
    base_dir: PathBuf,
    behavior: Mutex<RendererBehavior>,
    healthy: Mutex<bool>,
    requests: Mutex<Vec<HashMap<String, String>>>,
}

/// In-process stand-in for the external renderer's HTTP protocol.
pub struct FakeRendererServer {
    pub addr: SocketAddr,
    state: Arc<FakeRendererState>,
}

impl FakeRendererServer {
    pub async fn start(base_dir: &Path, behavior: RendererBehavior) -> Self {
        let state = Arc::new(FakeRendererState {
            base_dir: base_dir.to_path_buf(),
            behavior: Mutex::new(behavior),
            healthy: Mutex::new(true),
            requests: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/", get(capture_handler))
            .route("/healthCheck", get(health_handler))
            .with_state(state.clone());

        let addr = spawn_router(router).await;
        Self { addr, state }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn set_behavior(&self, behavior: RendererBehavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.state.healthy.lock().unwrap() = healthy;
    }

    /// Headers of every capture request received so far (names lowercased).
    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn capture_handler(
    State(state): State<Arc<FakeRendererState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let received: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    state.requests.lock().unwrap().push(received.clone());

    let behavior = *state.behavior.lock().unwrap();
    match behavior {
        RendererBehavior::Succeed => {
            let Some(filename) = received.get("filename") else {
                return (StatusCode::BAD_REQUEST, "Error: missing filename header\n".to_string());
            };
            let dim = |name: &str, default: u32| {
                received
                    .get(name)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default)
            };
            let width = dim("width", DEFAULT_VIEWPORT.0);
            let height = dim("height", DEFAULT_VIEWPORT.1);
            let path = state.base_dir.join(filename);
            if let Err(e) = tokio::fs::write(&path, png_bytes(width, height)).await {
                return (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}\n", e));
            }
            (
                StatusCode::OK,
                format!("Success: Screenshot saved to {}\n", path.display()),
            )
        }
        RendererBehavior::EmbeddedError => {
            (StatusCode::OK, "Error: Url returned status fail\n".to_string())
        }
        RendererBehavior::ServerError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error while parsing headers: boom".to_string(),
        ),
        RendererBehavior::Hang => std::future::pending().await,
    }
}

async fn health_handler(State(state): State<Arc<FakeRendererState>>) -> impl IntoResponse {
    if *state.healthy.lock().unwrap() {
        (StatusCode::OK, "up")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "down")
    }
}

// ============================================================================
// Callback receiver
// ============================================================================

/// One request received by a [`CallbackReceiver`].
#[derive(Debug, Clone)]
pub struct ReceivedCallback {
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ReceivedCallback {
    /// Body parsed as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("callback body is JSON")
    }
}

/// HTTP endpoint that records every request it receives.
pub struct CallbackReceiver {
    pub addr: SocketAddr,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ReceivedCallback>>,
    status: Arc<AtomicU16>,
}

#[derive(Clone)]
struct CallbackState {
    tx: mpsc::UnboundedSender<ReceivedCallback>,
    status: Arc<AtomicU16>,
}

impl CallbackReceiver {
    pub async fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(AtomicU16::new(200));
        let router = Router::new()
            .fallback(record_handler)
            .with_state(CallbackState {
                tx,
                status: status.clone(),
            });
        let addr = spawn_router(router).await;

        Self {
            addr,
            rx: tokio::sync::Mutex::new(rx),
            status,
        }
    }

    /// URL for a path on this receiver, e.g. `url("/hook")`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Status code returned to subsequent requests.
    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    /// Wait up to `timeout` for the next recorded request.
    pub async fn next(&self, timeout: Duration) -> Option<ReceivedCallback> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }
}

async fn record_handler(
    State(state): State<CallbackState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state
        .tx
        .send(ReceivedCallback {
            path: uri.path().to_string(),
            content_type,
            body,
        })
        .ok();
    StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}
