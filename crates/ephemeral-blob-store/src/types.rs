//! Store types

use crate::error::{Result, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Name of the metadata log inside the store root
pub const METADATA_LOG_FILE: &str = "metadata.txt";

/// Longest hex string accepted as a handle
pub const MAX_HANDLE_LEN: usize = 128;

/// Random bytes per generated handle (128 bits)
pub const DEFAULT_HANDLE_BYTES: usize = 16;

/// Opaque lowercase-hex token naming one stored blob.
///
/// A handle is also the blob's file name under the store root, so parsing
/// only admits hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty()
            || raw.len() > MAX_HANDLE_LEN
            || !raw.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(StoreError::InvalidHandle(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Hex-encode raw bytes into a handle
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Handle {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Metadata kept for each live blob.
///
/// Field names on the wire match the metadata log format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Original upload name. Untrusted, display only.
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "ExpirationTime")]
    pub expiration_time: DateTime<Utc>,
}

impl FileMetadata {
    pub fn new(filename: impl Into<String>, expiration_time: DateTime<Utc>) -> Self {
        Self {
            filename: filename.into(),
            expiration_time,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time <= now
    }
}

/// Resolve a requested retention (in minutes) to a TTL.
///
/// Missing, non-numeric, zero, negative or out-of-range values all yield
/// `default_ttl`.
pub fn effective_ttl(requested_minutes: Option<&str>, default_ttl: Duration) -> Duration {
    requested_minutes
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|minutes| *minutes > 0)
        .and_then(Duration::try_minutes)
        .unwrap_or(default_ttl)
}

/// Configuration for an [`ObjectStore`](crate::ObjectStore)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding blob files and the metadata log
    pub root: PathBuf,
    pub default_ttl: Duration,
    pub eviction_interval: std::time::Duration,
    /// Newest log lines considered during recovery
    pub replay_window: usize,
    pub max_handle_attempts: usize,
    pub handle_bytes: usize,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(METADATA_LOG_FILE)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            default_ttl: Duration::minutes(1),
            eviction_interval: std::time::Duration::from_secs(60),
            replay_window: 1000,
            max_handle_attempts: 10,
            handle_bytes: DEFAULT_HANDLE_BYTES,
        }
    }
}

/// Point-in-time statistics about the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub entries: usize,
    pub reserved: usize,
    pub log_appends: u64,
    pub log_failures: u64,
    pub evictions: u64,
    pub eviction_failures: u64,
}

/// Outcome of a startup recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Lines inside the replay window
    pub lines_read: usize,
    pub restored: usize,
    pub missing_blob: usize,
    pub malformed: usize,
    /// Entries whose blob could not be checked
    pub unreadable: usize,
    pub stale_staging_removed: usize,
}

/// Outcome of one eviction tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub expired: usize,
    pub evicted: usize,
    pub failed: usize,
}
