//! Ephemeral blob store
//!
//! Stores uploaded blobs on disk under short random handles and forgets them
//! once they expire. Metadata lives in memory, is mirrored to an append-only
//! log for crash recovery, and is swept periodically together with the blobs
//! it describes.

mod blob;
mod error;
mod handle;
mod log;
mod store;
mod sweeper;
mod types;

pub use blob::{BlobStore, StagedBlob};
pub use error::{Result, StoreError};
pub use handle::{HandleGenerator, RandomHandles};
pub use log::{read_window, LogEntry, MetadataLog};
pub use store::{ObjectStore, Resolved};
pub use sweeper::spawn_sweeper;
pub use types::{
    effective_ttl, EvictionReport, FileMetadata, Handle, RecoveryReport, StoreConfig, StoreStats,
    DEFAULT_HANDLE_BYTES, MAX_HANDLE_LEN, METADATA_LOG_FILE,
};
