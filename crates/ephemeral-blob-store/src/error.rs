//! Error types for the ephemeral blob store

use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    Expired,
    ExhaustedKeyspace { attempts: usize },
    InvalidHandle(String),
    NotReserved(String),
    MalformedLogLine(String),
    Json(String),
    Io(Box<std::io::Error>),
    LogClosed,
}

impl StoreError {
    /// True for the errors a caller should surface as "nothing to serve"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound | StoreError::Expired | StoreError::InvalidHandle(_)
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "Blob not found"),
            StoreError::Expired => write!(f, "Blob has expired"),
            StoreError::ExhaustedKeyspace { attempts } => {
                write!(f, "Failed to allocate a unique handle after {} attempts", attempts)
            }
            StoreError::InvalidHandle(raw) => write!(f, "Invalid handle: {:?}", raw),
            StoreError::NotReserved(handle) => {
                write!(f, "Handle {} was not reserved before commit", handle)
            }
            StoreError::MalformedLogLine(msg) => write!(f, "Malformed metadata log line: {}", msg),
            StoreError::Json(msg) => write!(f, "JSON error: {}", msg),
            StoreError::Io(err) => write!(f, "IO error: {}", err),
            StoreError::LogClosed => write!(f, "Metadata log writer has stopped"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Json(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
