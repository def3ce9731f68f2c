//! Core types for the file sharing server

use ephemeral_blob_store::{StoreConfig, StoreStats};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub upload_dir: PathBuf,
    pub default_ttl_minutes: i64,
    pub cleanup_interval_secs: u64,
    pub replay_window: usize,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.upload_dir.clone(),
            default_ttl: chrono::Duration::try_minutes(self.default_ttl_minutes.max(1))
                .unwrap_or_else(|| chrono::Duration::minutes(1)),
            eviction_interval: self.cleanup_interval(),
            replay_window: self.replay_window,
            ..StoreConfig::default()
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            upload_dir: PathBuf::from("uploads"),
            default_ttl_minutes: 1,
            cleanup_interval_secs: 60,
            replay_window: 1000,
            max_upload_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Successful upload response
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub store: StoreStats,
}
