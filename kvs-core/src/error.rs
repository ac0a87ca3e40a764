/*!
Error types for the KVS persistency core.
*/

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the KVS core.
pub type Result<T> = std::result::Result<T, KvsError>;

/// Errors that can occur while flushing, restoring or accessing a store.
#[derive(Error, Debug)]
pub enum KvsError {
    /// Requested snapshot is the live state (id 0) or is not currently retained
    #[error("invalid snapshot id")]
    InvalidSnapshotId,

    /// Data file present but its content does not match the stored digest
    #[error("integrity check failed for {path}: expected hash {expected}, got {actual}")]
    Corruption {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Hash file present but unreadable or not a valid digest
    #[error("malformed hash file: {path}")]
    MalformedHash { path: PathBuf },

    /// A file expected by a lower-level read is absent
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key is neither set nor backed by a default
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Stored value cannot be converted into the requested type
    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    /// Configuration or argument validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A thread panicked while holding one of the instance locks
    #[error("instance lock poisoned")]
    LockPoisoned,
}

impl KvsError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new conversion error
    pub fn conversion<S: Into<String>>(msg: S) -> Self {
        Self::ConversionFailed(msg.into())
    }

    /// Map an I/O error for `path`, keeping absence distinguishable from other failures.
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.into())
        } else {
            Self::Io(err)
        }
    }

    /// True for both digest mismatches and unusable hash files.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. } | Self::MalformedHash { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for KvsError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}
