//! Image cache server
//!
//! Serves images through a memory tier, a disk tier and a coalescing
//! downloader, and drives disk maintenance from process lifecycle events.

mod config;
mod error;
mod maintenance;
mod server;
mod types;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::server::{start_server, ServerState, SharedState};
use image_retrieval::ImageManager;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter =
        EnvFilter::from_default_env().add_directive("image_cache_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting image cache server...");

    let config = ServerConfig::from_env();
    let disk_config = config.disk_config()?;
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", disk_config.directory);
    info!(
        "Max disk cache size: {} MB",
        config.max_disk_cache_size / (1024 * 1024)
    );
    info!("Max cache age: {} seconds", config.max_cache_age_secs);

    let manager = ImageManager::with_config(
        disk_config,
        config.memory_config(),
        config.downloader_config(),
    )?;
    let cache = manager.cache().clone();

    let cleanup_logger = maintenance::spawn_cleanup_logger(cache.subscribe());
    let sweeper = config.sweep_interval().map(|interval| {
        maintenance::spawn_periodic_sweep(cache.clone(), interval, config.sweep_budget())
    });

    let state: SharedState = Arc::new(ServerState::new(manager));

    // Serve until interrupted
    start_server(state, config.port, shutdown_signal())
        .await
        .map_err(|e| ServerError::Config(format!("Server error: {}", e)))?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    maintenance::clean_on_shutdown(&cache).await;
    cleanup_logger.abort();

    info!("Image cache server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
