//! Storage layout for the orchestration core.
//!
//! All durable state lives under a single data root owned by exactly one
//! process. This crate provides the canonical path scheme, rename-atomic
//! file writes, the pid lock that enforces single ownership, and the
//! startup sweep that collects directories orphaned by a crash.

mod layout;
mod lock;
mod write;

pub use layout::{DataLayout, LOG_DIR, OUTPUTS_DIR, UPLOADS_DIR};
pub use lock::PidLock;
pub use write::{atomic_write, atomic_write_json};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("data root is already locked by pid {0}")]
    AlreadyLocked(String),
    #[error("invalid artifact identifier: {0}")]
    InvalidArtifact(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
