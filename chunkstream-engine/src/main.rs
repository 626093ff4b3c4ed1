//! chunkstream - Main entry point
//!
//! Chunked enhancement streaming server: loads configuration, opens the
//! catalog, wires the engine, and serves `/ws` and `/health` until Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chunkstream_common::config::{load_toml_or_default, resolve_config_path};
use chunkstream_engine::catalog::SqliteCatalog;
use chunkstream_engine::config::EngineConfig;
use chunkstream_engine::context::EngineContext;
use chunkstream_engine::processing::GainEnhancer;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for chunkstream
#[derive(Parser, Debug)]
#[command(name = "chunkstream")]
#[command(about = "Chunked audio enhancement streaming server")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CHUNKSTREAM_PORT")]
    port: Option<u16>,

    /// Processed chunk cache directory
    #[arg(long, env = "CHUNKSTREAM_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Catalog database
    #[arg(long, env = "CHUNKSTREAM_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), "CHUNKSTREAM_CONFIG");
    let mut config: EngineConfig =
        load_toml_or_default(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    // Initialize tracing; RUST_LOG overrides the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("chunkstream_engine={0},tower_http={0}", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting chunkstream v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => warn!("No config file found, using built-in defaults"),
    }

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::create_dir_all(&config.cache_dir)
        .with_context(|| format!("Failed to create {}", config.cache_dir.display()))?;

    let catalog = SqliteCatalog::connect(&config.database_path)
        .await
        .context("Failed to open catalog")?;

    let port = config.port;
    let engine = Arc::new(
        EngineContext::new(config, Arc::new(catalog), Arc::new(GainEnhancer))
            .context("Failed to initialize engine")?,
    );
    engine.start().await;

    let app = chunkstream_engine::api::create_router(Arc::clone(&engine));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
