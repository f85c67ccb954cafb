//! On-disk and in-memory shapes of the vector index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk schema of `vectors/index.json`.
pub const SCHEMA_VERSION: u32 = 1;

/// One chunk embedding associated with a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub record_id: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub vector: Vec<f32>,
    pub uploaded_at: DateTime<Utc>,
    pub display_filename: String,
    pub source_filename: String,
}

/// Record-level metadata attached to each chunk on `put`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub uploaded_at: DateTime<Utc>,
    pub display_filename: String,
    pub source_filename: String,
}

/// Input to `put`: one chunk with its embedding.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Inclusive upload-time filter applied to searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if at > end {
                return false;
            }
        }
        true
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Stable text form used in cache keys.
    pub fn cache_token(&self) -> String {
        format!(
            "{}..{}",
            self.start.map(|d| d.to_rfc3339()).unwrap_or_default(),
            self.end.map(|d| d.to_rfc3339()).unwrap_or_default()
        )
    }
}

/// On-disk shape of the index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub schema_version: u32,
    /// Fixed on the first write; every later write must match.
    pub dim: Option<usize>,
    pub entries: Vec<VectorEntry>,
}

impl Default for IndexFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            dim: None,
            entries: Vec::new(),
        }
    }
}
