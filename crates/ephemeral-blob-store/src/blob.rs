//! Filesystem blob storage keyed by handle

use crate::error::{Result, StoreError};
use crate::types::Handle;
use rand::RngCore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// File name prefix for uploads that have no handle yet. The dot keeps it
/// disjoint from hex handles.
pub(crate) const STAGING_PREFIX: &str = ".staging-";

/// Raw blob files under a single root directory
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the root directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!(root = ?self.root, "Blob store initialized");
        Ok(())
    }

    pub fn path_for(&self, handle: &Handle) -> PathBuf {
        self.root.join(handle.as_str())
    }

    pub async fn write(&self, handle: &Handle, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(self.path_for(handle)).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        debug!(handle = %handle, size = data.len(), "Wrote blob");
        Ok(())
    }

    pub async fn open(&self, handle: &Handle) -> Result<fs::File> {
        match fs::File::open(self.path_for(handle)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, handle: &Handle) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(handle)).await?)
    }

    /// Delete a blob. Returns `false` if it was already absent.
    pub async fn delete(&self, handle: &Handle) -> Result<bool> {
        match fs::remove_file(self.path_for(handle)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Start a new upload under a temporary name
    pub async fn create_staged(&self) -> Result<StagedBlob> {
        let mut suffix = [0u8; 16];
        rand::rng().fill_bytes(&mut suffix);
        let path = self
            .root
            .join(format!("{}{}", STAGING_PREFIX, hex::encode(suffix)));

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        Ok(StagedBlob { path, file, len: 0 })
    }

    /// Make a staged upload durable and move it under its handle
    pub(crate) async fn promote(&self, staged: StagedBlob, handle: &Handle) -> Result<()> {
        let StagedBlob {
            path,
            mut file,
            len,
        } = staged;

        let result = async {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&path, self.path_for(handle)).await
        }
        .await;

        if let Err(e) = result {
            warn!(path = ?path, error = %e, "Failed to promote staged blob");
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = ?path, error = %e, "Failed to remove staged blob");
                }
            }
            return Err(e.into());
        }

        debug!(handle = %handle, size = len, "Promoted staged blob");
        Ok(())
    }

    /// Remove uploads left behind by a crash. Only safe before traffic starts.
    pub async fn remove_stale_staging(&self) -> Result<usize> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let is_staging = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGING_PREFIX));
            if !is_staging {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?entry.path(), error = %e, "Failed to remove stale upload"),
            }
        }
        Ok(removed)
    }
}

/// An upload being written before it has a handle
#[derive(Debug)]
pub struct StagedBlob {
    path: PathBuf,
    file: fs::File,
    len: u64,
}

impl StagedBlob {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Abandon the upload and remove its file
    pub async fn discard(self) {
        let StagedBlob { path, file, .. } = self;
        drop(file);
        match fs::remove_file(&path).await {
            Ok(()) => debug!(path = ?path, "Discarded staged blob"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?path, error = %e, "Failed to discard staged blob"),
        }
    }
}
