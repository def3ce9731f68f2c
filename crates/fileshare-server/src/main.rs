//! File sharing server
//!
//! Accepts uploads, hands back a short-lived handle, serves the file until the
//! handle expires and sweeps expired files from disk.

use ephemeral_blob_store::{spawn_sweeper, ObjectStore};
use fileshare_server::{start_server, Result, ServerConfig, ServerError, ServerState, SharedState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("fileshare_server=info".parse()?)
        .add_directive("ephemeral_blob_store=info".parse()?);

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

    info!("Starting file sharing server...");

    let config = load_config();
    info!("Port: {}", config.port);
    info!("Upload dir: {:?}", config.upload_dir);
    info!("Default TTL: {} minutes", config.default_ttl_minutes);
    info!("Cleanup interval: {} seconds", config.cleanup_interval_secs);

    // The upload directory is the one thing we cannot run without
    let store = Arc::new(ObjectStore::new(config.store_config()));
    store.init().await.map_err(|e| {
        error!(error = %e, "Failed to create upload directory");
        ServerError::from(e)
    })?;

    match store.recover().await {
        Ok(report) => info!(
            restored = report.restored,
            skipped = report.missing_blob + report.malformed + report.unreadable,
            "Metadata loaded"
        ),
        Err(e) => error!(error = %e, "Failed to load metadata, starting empty"),
    }

    let sweeper = spawn_sweeper(store.clone(), store.config().eviction_interval);

    let state: SharedState = Arc::new(ServerState::new(store.clone(), config.max_upload_bytes));
    let served = start_server(state, config.port, shutdown_signal()).await;

    sweeper.abort();
    if let Err(e) = store.flush_log().await {
        warn!(error = %e, "Failed to flush metadata log on shutdown");
    }

    served.map_err(ServerError::from)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn load_config() -> ServerConfig {
    let defaults = ServerConfig::default();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let upload_dir = std::env::var("UPLOAD_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.upload_dir);

    let default_ttl_minutes = std::env::var("DEFAULT_TTL_MINUTES")
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|m| *m > 0)
        .unwrap_or(defaults.default_ttl_minutes);

    let cleanup_interval_secs = std::env::var("CLEANUP_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .unwrap_or(defaults.cleanup_interval_secs);

    let replay_window = std::env::var("REPLAY_WINDOW")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(defaults.replay_window);

    let max_upload_bytes = std::env::var("MAX_UPLOAD_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(defaults.max_upload_bytes);

    ServerConfig {
        port,
        upload_dir,
        default_ttl_minutes,
        cleanup_interval_secs,
        replay_window,
        max_upload_bytes,
    }
}
