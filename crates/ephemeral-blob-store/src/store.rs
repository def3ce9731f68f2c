//! The authoritative handle → metadata map
//!
//! [`ObjectStore`] owns the in-memory map, the blob directory and the
//! metadata log. All map access goes through one lock, and no file I/O is
//! done while it is held. A live record always has a blob on disk: blobs are
//! written before their record is committed and deleted before it is removed.

use crate::blob::{BlobStore, StagedBlob};
use crate::error::{Result, StoreError};
use crate::handle::{HandleGenerator, RandomHandles};
use crate::log::{read_window, LogEntry, MetadataLog};
use crate::types::{
    effective_ttl, FileMetadata, Handle, RecoveryReport, StoreConfig, StoreStats,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Entries {
    records: HashMap<Handle, FileMetadata>,
    /// Allocated handles whose blob is still being written
    reserved: HashSet<Handle>,
}

/// A live blob ready to be streamed
#[derive(Debug)]
pub struct Resolved {
    pub handle: Handle,
    pub metadata: FileMetadata,
    pub file: fs::File,
}

pub struct ObjectStore {
    config: StoreConfig,
    entries: RwLock<Entries>,
    blobs: BlobStore,
    log: MetadataLog,
    generator: Box<dyn HandleGenerator>,
    pub(crate) evictions: AtomicU64,
    pub(crate) eviction_failures: AtomicU64,
}

impl ObjectStore {
    /// Create a store with random 128-bit handles.
    ///
    /// Spawns the metadata log writer, so this must run inside a Tokio
    /// runtime.
    pub fn new(config: StoreConfig) -> Self {
        let generator = RandomHandles::new(config.handle_bytes);
        Self::with_generator(config, generator)
    }

    pub fn with_generator(config: StoreConfig, generator: impl HandleGenerator) -> Self {
        let log = MetadataLog::spawn(config.log_path());
        Self {
            blobs: BlobStore::new(config.root.clone()),
            entries: RwLock::new(Entries::default()),
            log,
            generator: Box::new(generator),
            evictions: AtomicU64::new(0),
            eviction_failures: AtomicU64::new(0),
            config,
        }
    }

    /// Ensure the root directory exists
    pub async fn init(&self) -> Result<()> {
        self.blobs.init().await
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// TTL for a raw `Retention-Time` style value, in minutes
    pub fn ttl_from_request(&self, requested_minutes: Option<&str>) -> Duration {
        effective_ttl(requested_minutes, self.config.default_ttl)
    }

    fn expiration_after(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = if ttl > Duration::zero() {
            ttl
        } else {
            self.config.default_ttl
        };
        let now = Utc::now();
        now.checked_add_signed(ttl)
            .unwrap_or_else(|| now + self.config.default_ttl)
    }

    /// Reserve a fresh handle.
    ///
    /// Candidates are checked against live records and other reservations
    /// under the write lock, so concurrent callers never share a handle.
    pub async fn allocate(&self) -> Result<Handle> {
        let attempts = self.config.max_handle_attempts.max(1);
        let mut entries = self.entries.write().await;

        for attempt in 1..=attempts {
            let handle = self.generator.generate();
            if entries.records.contains_key(&handle) || entries.reserved.contains(&handle) {
                debug!(handle = %handle, attempt, "Handle collision, retrying");
                continue;
            }
            entries.reserved.insert(handle.clone());
            return Ok(handle);
        }

        warn!(attempts, "Failed to generate a unique handle");
        Err(StoreError::ExhaustedKeyspace { attempts })
    }

    /// Drop a reservation whose blob never made it to disk
    pub async fn release(&self, handle: &Handle) {
        self.entries.write().await.reserved.remove(handle);
    }

    /// Commit metadata for a reserved handle whose blob is already written.
    ///
    /// The record is visible to readers as soon as this returns; the log
    /// append is queued under the same lock so log order matches commit
    /// order.
    pub async fn commit_reserved(
        &self,
        handle: Handle,
        filename: impl Into<String>,
        expiration_time: DateTime<Utc>,
    ) -> Result<FileMetadata> {
        let metadata = FileMetadata::new(filename, expiration_time);
        {
            let mut entries = self.entries.write().await;
            if !entries.reserved.remove(&handle) {
                return Err(StoreError::NotReserved(handle.to_string()));
            }
            entries.records.insert(handle.clone(), metadata.clone());
            self.log
                .append(LogEntry::new(handle.clone(), metadata.clone()));
        }

        info!(
            handle = %handle,
            expiration_time = %metadata.expiration_time,
            "Committed blob"
        );
        Ok(metadata)
    }

    /// Assign a handle to a fully written upload and commit it
    pub async fn commit_staged(
        &self,
        staged: StagedBlob,
        filename: &str,
        ttl: Duration,
    ) -> Result<Handle> {
        let handle = match self.allocate().await {
            Ok(handle) => handle,
            Err(e) => {
                staged.discard().await;
                return Err(e);
            }
        };

        if let Err(e) = self.blobs.promote(staged, &handle).await {
            self.release(&handle).await;
            return Err(e);
        }

        let expiration_time = self.expiration_after(ttl);
        self.commit_reserved(handle.clone(), filename, expiration_time)
            .await?;
        Ok(handle)
    }

    /// Store an in-memory blob. Non-positive TTLs fall back to the default.
    pub async fn store_bytes(&self, filename: &str, data: &[u8], ttl: Duration) -> Result<Handle> {
        let mut staged = self.blobs.create_staged().await?;
        if let Err(e) = staged.write(data).await {
            staged.discard().await;
            return Err(e);
        }
        self.commit_staged(staged, filename, ttl).await
    }

    pub async fn get(&self, handle: &Handle) -> Result<FileMetadata> {
        self.entries
            .read()
            .await
            .records
            .get(handle)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Look up a live record and open its blob
    pub async fn resolve(&self, handle: &Handle) -> Result<Resolved> {
        let metadata = self.get(handle).await?;
        if metadata.is_expired_at(Utc::now()) {
            debug!(handle = %handle, "Blob has expired");
            return Err(StoreError::Expired);
        }

        let file = self.blobs.open(handle).await?;
        Ok(Resolved {
            handle: handle.clone(),
            metadata,
            file,
        })
    }

    /// Consistent copy of every committed record
    pub async fn snapshot(&self) -> Vec<(Handle, FileMetadata)> {
        self.entries
            .read()
            .await
            .records
            .iter()
            .map(|(handle, metadata)| (handle.clone(), metadata.clone()))
            .collect()
    }

    /// Remove a record. Callers must have deleted the blob first.
    pub(crate) async fn remove(&self, handle: &Handle) -> Option<FileMetadata> {
        self.entries.write().await.records.remove(handle)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait for queued log appends to reach the file
    pub async fn flush_log(&self) -> Result<()> {
        self.log.flush().await
    }

    pub async fn stats(&self) -> StoreStats {
        let entries = self.entries.read().await;
        StoreStats {
            entries: entries.records.len(),
            reserved: entries.reserved.len(),
            log_appends: self.log.appended(),
            log_failures: self.log.failed(),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_failures: self.eviction_failures.load(Ordering::Relaxed),
        }
    }

    /// Rebuild the map from the newest lines of the metadata log.
    ///
    /// Entries whose blob is gone or cannot be checked are dropped;
    /// unparseable lines are logged and skipped. Only failing to read the log
    /// itself is an error. Run once at startup before serving traffic.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        match self.blobs.remove_stale_staging().await {
            Ok(removed) => report.stale_staging_removed = removed,
            Err(e) => warn!(error = %e, "Failed to sweep stale uploads"),
        }

        let log_path = self.config.log_path();
        let Some(lines) = read_window(&log_path, self.config.replay_window).await? else {
            info!(path = ?log_path, "No metadata log, starting empty");
            return Ok(report);
        };
        report.lines_read = lines.len();

        let mut restored = HashMap::new();
        for (index, line) in lines.iter().enumerate() {
            let entry = match LogEntry::parse_line(line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(line = index, error = %e, "Skipping malformed metadata log line");
                    report.malformed += 1;
                    continue;
                }
            };

            match self.blobs.exists(&entry.handle).await {
                Ok(true) => {
                    restored.insert(entry.handle, entry.metadata);
                }
                Ok(false) => {
                    debug!(handle = %entry.handle, "Blob missing, skipping log entry");
                    report.missing_blob += 1;
                }
                Err(e) => {
                    warn!(handle = %entry.handle, error = %e, "Failed to check blob, skipping log entry");
                    report.unreadable += 1;
                }
            }
        }

        report.restored = restored.len();
        self.entries.write().await.records.extend(restored);

        info!(
            lines = report.lines_read,
            restored = report.restored,
            missing_blob = report.missing_blob,
            malformed = report.malformed,
            unreadable = report.unreadable,
            "Recovered metadata"
        );
        Ok(report)
    }
}
