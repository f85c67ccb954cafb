//! Persistent vector index for semantic and keyword search.
//!
//! One JSON file under `vectors/` holds every chunk embedding with its
//! metadata. Queries run against a copy-on-write snapshot so they never
//! block writers; mutations rewrite the file atomically and invalidate the
//! query cache.

mod cache;
mod entry;
mod index;

pub use cache::{QueryCache, QUERY_CACHE_TTL};
pub use entry::{ChunkEmbedding, DateRange, EntryMeta, IndexFile, VectorEntry, SCHEMA_VERSION};
pub use index::{IndexStats, KeywordHit, SearchHit, VectorIndex};

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("embedding dimension mismatch: index holds {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("inconsistent chunk dimensions within one put")]
    InconsistentChunks,
    #[error("vector index schema version {0} is newer than supported; upgrade required")]
    UpgradeRequired(u32),
    #[error("no entries for record: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] recordroute_storage::StorageError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VectorError>;
