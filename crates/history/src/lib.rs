//! Record history: the durable truth about uploads and completed steps.
//!
//! A single JSON file under the data root holds every record in insertion
//! order. All mutations go through `HistoryStore`, which serializes a full
//! snapshot through a rename-atomic write while holding an exclusive lock.

mod record;
mod store;

pub use record::{FileType, HistoryFile, Record, SCHEMA_VERSION};
pub use store::HistoryStore;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("history schema version {0} is newer than supported; upgrade required")]
    UpgradeRequired(u32),
    #[error(transparent)]
    Storage(#[from] recordroute_storage::StorageError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HistoryError>;
