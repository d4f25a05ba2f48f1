//! Screenshot API service.
//!
//! HTTP server that renders web pages through a local renderer process.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use webshot_api::config::{AppConfig, Args};
use webshot_api::state::AppState;
use webshot_api::{build_router, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = AppConfig::from_args(&args)?;

    let prometheus_handle =
        metrics::install_recorder().context("Failed to install Prometheus recorder")?;
    info!("Prometheus metrics exporter initialized");

    tokio::fs::create_dir_all(&config.renderer.render_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.renderer.render_dir.display()))?;

    let state = Arc::new(AppState::new(config).await?);

    if let Some(process) = &state.process {
        process.start().await.context("Renderer did not start")?;
        if let Some(interval) = state.config.renderer.health_interval {
            process.clone().spawn_watchdog(interval);
            info!(interval_secs = interval.as_secs(), "Renderer watchdog started");
        }
    } else if !state.renderer.health_check().await {
        warn!(
            host = %state.config.renderer.host,
            port = state.config.renderer.port,
            "Renderer is not answering yet"
        );
    }

    let addr = state.config.listen;
    let app = build_router(state.clone(), Some(prometheus_handle));

    info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
        })
        .await?;

    if let Some(process) = &state.process {
        process.shutdown().await;
    }

    Ok(())
}
