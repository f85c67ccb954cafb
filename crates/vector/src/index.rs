//! The vector index: exclusive owner of `vectors/index.json`.

use crate::cache::QueryCache;
use crate::entry::{
    ChunkEmbedding, DateRange, EntryMeta, IndexFile, VectorEntry, SCHEMA_VERSION,
};
use crate::{Result, VectorError};
use chrono::Utc;
use recordroute_storage::{atomic_write_json, DataLayout};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// A scored chunk match from cosine search.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub record_id: String,
    pub chunk_index: usize,
    pub score: f32,
    pub chunk_text: String,
    pub uploaded_at: chrono::DateTime<Utc>,
    pub display_filename: String,
    pub source_filename: String,
}

/// A per-record keyword match count.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KeywordHit {
    pub record_id: String,
    pub count: usize,
    pub uploaded_at: chrono::DateTime<Utc>,
    pub display_filename: String,
    pub source_filename: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub count: usize,
    pub dim: Option<usize>,
    pub records: usize,
}

struct State {
    dim: Option<usize>,
    entries: Arc<Vec<VectorEntry>>,
    /// Set when the on-disk schema is newer than this build supports;
    /// writes are refused until an upgraded build takes over.
    newer_schema: Option<u32>,
}

/// Persistent collection of chunk embeddings with cosine and keyword search.
///
/// Writers hold the exclusive lock only long enough to rewrite the file and
/// swap the snapshot; queries clone the `Arc` and never block on writers.
pub struct VectorIndex {
    path: PathBuf,
    state: RwLock<State>,
    cache: Mutex<QueryCache<serde_json::Value>>,
}

impl VectorIndex {
    /// Load the index file, salvaging a corrupt one by renaming it aside.
    pub fn open(layout: &DataLayout) -> Result<Self> {
        let path = layout.vector_index_file();
        let mut newer_schema = None;

        let file = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<IndexFile>(&contents) {
                Ok(file) if file.schema_version > SCHEMA_VERSION => {
                    tracing::error!(
                        found = file.schema_version,
                        supported = SCHEMA_VERSION,
                        "vector index schema is newer than this build; refusing to write. Upgrade required."
                    );
                    newer_schema = Some(file.schema_version);
                    file
                }
                Ok(file) => file,
                Err(e) => {
                    let salvage = path.with_extension(format!("json.bad.{}", Utc::now().timestamp()));
                    tracing::warn!(
                        error = %e,
                        salvaged = %salvage.display(),
                        "corrupt vector index; starting empty"
                    );
                    let _ = fs::rename(&path, &salvage);
                    IndexFile::default()
                }
            },
            Err(_) => IndexFile::default(),
        };

        tracing::info!(entries = file.entries.len(), dim = ?file.dim, "vector index loaded");
        Ok(Self {
            path,
            state: RwLock::new(State {
                dim: file.dim,
                entries: Arc::new(file.entries),
                newer_schema,
            }),
            cache: Mutex::new(QueryCache::new()),
        })
    }

    /// Replace all entries for a record with the given chunks.
    ///
    /// The first successful `put` fixes the index dimensionality; every
    /// later write must match it. Vectors are stored normalized.
    pub fn put(&self, record_id: &str, chunks: Vec<ChunkEmbedding>, meta: EntryMeta) -> Result<()> {
        let dim = match chunks.first() {
            Some(first) => first.vector.len(),
            None => return self.delete(record_id).map(|_| ()),
        };
        if chunks.iter().any(|c| c.vector.len() != dim) {
            return Err(VectorError::InconsistentChunks);
        }

        let mut state = self.write_lock()?;
        if let Some(expected) = state.dim {
            if expected != dim {
                return Err(VectorError::DimensionMismatch { expected, got: dim });
            }
        }

        let mut entries: Vec<VectorEntry> = state
            .entries
            .iter()
            .filter(|e| e.record_id != record_id)
            .cloned()
            .collect();
        for chunk in chunks {
            entries.push(VectorEntry {
                record_id: record_id.to_string(),
                chunk_index: chunk.index,
                chunk_text: chunk.text,
                vector: normalized(chunk.vector),
                uploaded_at: meta.uploaded_at,
                display_filename: meta.display_filename.clone(),
                source_filename: meta.source_filename.clone(),
            });
        }

        let dim = Some(dim);
        self.persist(dim, &entries)?;
        state.dim = dim;
        state.entries = Arc::new(entries);
        drop(state);

        self.invalidate_cache();
        Ok(())
    }

    /// Remove all entries for a record. Returns how many were removed.
    pub fn delete(&self, record_id: &str) -> Result<usize> {
        let mut state = self.write_lock()?;
        let before = state.entries.len();
        let entries: Vec<VectorEntry> = state
            .entries
            .iter()
            .filter(|e| e.record_id != record_id)
            .cloned()
            .collect();
        let removed = before - entries.len();
        if removed == 0 {
            return Ok(0);
        }

        self.persist(state.dim, &entries)?;
        state.entries = Arc::new(entries);
        drop(state);

        self.invalidate_cache();
        Ok(removed)
    }

    /// Cosine-similarity search over the full set.
    pub fn search(&self, query: &[f32], top_k: usize, range: DateRange) -> Vec<SearchHit> {
        let entries = self.snapshot();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter(|e| e.vector.len() == query.len() && range.contains(e.uploaded_at))
            .map(|e| SearchHit {
                record_id: e.record_id.clone(),
                chunk_index: e.chunk_index,
                score: cosine(query, &e.vector),
                chunk_text: e.chunk_text.clone(),
                uploaded_at: e.uploaded_at,
                display_filename: e.display_filename.clone(),
                source_filename: e.source_filename.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }

    /// Case-insensitive substring count per record.
    pub fn keyword_search(&self, term: &str, top_k: usize, range: DateRange) -> Vec<KeywordHit> {
        let needle = term.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let entries = self.snapshot();
        let mut hits: Vec<KeywordHit> = Vec::new();
        for entry in entries.iter().filter(|e| range.contains(e.uploaded_at)) {
            let count = entry.chunk_text.to_lowercase().matches(&needle).count();
            if count == 0 {
                continue;
            }
            match hits.iter_mut().find(|h| h.record_id == entry.record_id) {
                Some(hit) => hit.count += count,
                None => hits.push(KeywordHit {
                    record_id: entry.record_id.clone(),
                    count,
                    uploaded_at: entry.uploaded_at,
                    display_filename: entry.display_filename.clone(),
                    source_filename: entry.source_filename.clone(),
                }),
            }
        }
        hits.sort_by(|a, b| b.count.cmp(&a.count));
        hits.truncate(top_k);
        hits
    }

    /// Find records similar to an existing one via its mean chunk vector.
    ///
    /// The record itself is excluded from the results.
    pub fn similar_to(&self, record_id: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let entries = self.snapshot();
        let own: Vec<&VectorEntry> = entries
            .iter()
            .filter(|e| e.record_id == record_id)
            .collect();
        let first = own
            .first()
            .ok_or_else(|| VectorError::NotFound(record_id.to_string()))?;

        let dim = first.vector.len();
        let mut mean = vec![0.0f32; dim];
        for entry in &own {
            for (acc, v) in mean.iter_mut().zip(&entry.vector) {
                *acc += v;
            }
        }
        let n = own.len() as f32;
        for v in &mut mean {
            *v /= n;
        }

        let hits = self
            .search(&mean, top_k.saturating_add(own.len()), DateRange::default())
            .into_iter()
            .filter(|h| h.record_id != record_id)
            .take(top_k)
            .collect();
        Ok(hits)
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let records: HashSet<&str> = state.entries.iter().map(|e| e.record_id.as_str()).collect();
        IndexStats {
            count: state.entries.len(),
            dim: state.dim,
            records: records.len(),
        }
    }

    /// Whether any entries exist for a record.
    pub fn contains(&self, record_id: &str) -> bool {
        self.snapshot().iter().any(|e| e.record_id == record_id)
    }

    /// Look up a cached query result that has not expired.
    pub fn cached_query(&self, query: &str, range: DateRange) -> Option<serde_json::Value> {
        let key = QueryCache::<serde_json::Value>::key(query, &range.cache_token());
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key)
    }

    /// Remember a query result until the next mutation or TTL expiry.
    pub fn store_cached_query(&self, query: &str, range: DateRange, value: serde_json::Value) {
        let key = QueryCache::<serde_json::Value>::key(query, &range.cache_token());
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
    }

    fn invalidate_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn snapshot(&self) -> Arc<Vec<VectorEntry>> {
        Arc::clone(&self.state.read().unwrap_or_else(|e| e.into_inner()).entries)
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        let state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(found) = state.newer_schema {
            return Err(VectorError::UpgradeRequired(found));
        }
        Ok(state)
    }

    fn persist(&self, dim: Option<usize>, entries: &[VectorEntry]) -> Result<()> {
        let file = IndexFile {
            schema_version: SCHEMA_VERSION,
            dim,
            entries: entries.to_vec(),
        };
        atomic_write_json(&self.path, &file)?;
        Ok(())
    }
}

/// cosine similarity = dot(a, b) / (‖a‖ · ‖b‖), zero when either norm is.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let norm = na.sqrt() * nb.sqrt();
    if norm == 0.0 {
        0.0
    } else {
        dot / norm
    }
}

fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn index() -> (TempDir, VectorIndex) {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path()).unwrap();
        let index = VectorIndex::open(&layout).unwrap();
        (dir, index)
    }

    fn meta() -> EntryMeta {
        EntryMeta {
            uploaded_at: Utc::now(),
            display_filename: "meeting.wav".to_string(),
            source_filename: "meeting.wav".to_string(),
        }
    }

    fn chunk(index: usize, text: &str, vector: Vec<f32>) -> ChunkEmbedding {
        ChunkEmbedding {
            index,
            text: text.to_string(),
            vector,
        }
    }

    #[test]
    fn test_put_then_search_finds_own_vector() {
        let (_dir, index) = index();
        index
            .put(
                "r1",
                vec![chunk(0, "quarterly budget review", vec![1.0, 0.0, 0.0])],
                meta(),
            )
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 5, DateRange::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "r1");
        assert!(hits[0].score >= 0.999);
    }

    #[test]
    fn test_search_tolerates_unnormalized_query() {
        let (_dir, index) = index();
        index
            .put("r1", vec![chunk(0, "text", vec![3.0, 4.0])], meta())
            .unwrap();

        let hits = index.search(&[30.0, 40.0], 1, DateRange::default());
        assert!(hits[0].score >= 0.999);
    }

    #[test]
    fn test_dimension_fixed_at_first_put() {
        let (_dir, index) = index();
        index
            .put("r1", vec![chunk(0, "a", vec![1.0, 0.0])], meta())
            .unwrap();

        let err = index
            .put("r2", vec![chunk(0, "b", vec![1.0, 0.0, 0.0])], meta())
            .unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch { expected: 2, got: 3 }
        ));
    }

    #[test]
    fn test_put_replaces_existing_entries() {
        let (_dir, index) = index();
        index
            .put(
                "r1",
                vec![
                    chunk(0, "first", vec![1.0, 0.0]),
                    chunk(1, "second", vec![0.0, 1.0]),
                ],
                meta(),
            )
            .unwrap();
        index
            .put("r1", vec![chunk(0, "replaced", vec![1.0, 0.0])], meta())
            .unwrap();

        let stats = index.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.records, 1);
    }

    #[test]
    fn test_delete_removes_all_entries() {
        let (_dir, index) = index();
        index
            .put(
                "r1",
                vec![chunk(0, "a", vec![1.0, 0.0]), chunk(1, "b", vec![0.0, 1.0])],
                meta(),
            )
            .unwrap();

        assert_eq!(index.delete("r1").unwrap(), 2);
        assert_eq!(index.delete("r1").unwrap(), 0);
        assert!(!index.contains("r1"));
    }

    #[test]
    fn test_keyword_search_counts_per_record() {
        let (_dir, index) = index();
        index
            .put(
                "r1",
                vec![chunk(0, "Budget budget BUDGET", vec![1.0, 0.0])],
                meta(),
            )
            .unwrap();
        index
            .put("r2", vec![chunk(0, "budget once", vec![0.0, 1.0])], meta())
            .unwrap();

        let hits = index.keyword_search("budget", 10, DateRange::default());
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record_id, "r1");
        assert_eq!(hits[0].count, 3);
        assert_eq!(hits[1].count, 1);
    }

    #[test]
    fn test_similar_to_excludes_self() {
        let (_dir, index) = index();
        index
            .put("r1", vec![chunk(0, "a", vec![1.0, 0.0])], meta())
            .unwrap();
        index
            .put("r2", vec![chunk(0, "b", vec![0.9, 0.1])], meta())
            .unwrap();

        let hits = index.similar_to("r1", 5).unwrap();
        assert!(!hits.iter().any(|h| h.record_id == "r1"));
        assert_eq!(hits[0].record_id, "r2");
    }

    #[test]
    fn test_date_filter_excludes_out_of_range() {
        let (_dir, index) = index();
        let old = EntryMeta {
            uploaded_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            display_filename: "old.wav".to_string(),
            source_filename: "old.wav".to_string(),
        };
        index
            .put("r1", vec![chunk(0, "old content", vec![1.0, 0.0])], old)
            .unwrap();

        let range = DateRange {
            start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end: None,
        };
        assert!(index.search(&[1.0, 0.0], 5, range).is_empty());
        assert!(index.keyword_search("old", 5, range).is_empty());
    }

    #[test]
    fn test_mutation_invalidates_query_cache() {
        let (_dir, index) = index();
        index.store_cached_query("q", DateRange::default(), serde_json::json!({"hits": 1}));
        assert!(index.cached_query("q", DateRange::default()).is_some());

        index
            .put("r1", vec![chunk(0, "a", vec![1.0, 0.0])], meta())
            .unwrap();
        assert!(index.cached_query("q", DateRange::default()).is_none());
    }

    #[test]
    fn test_survives_reload() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path()).unwrap();
        {
            let index = VectorIndex::open(&layout).unwrap();
            index
                .put("r1", vec![chunk(0, "persisted", vec![1.0, 0.0])], meta())
                .unwrap();
        }
        let index = VectorIndex::open(&layout).unwrap();
        assert_eq!(index.stats().count, 1);
        assert_eq!(index.stats().dim, Some(2));
    }

    #[test]
    fn test_corrupt_file_salvaged() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path()).unwrap();
        fs::write(layout.vector_index_file(), b"[broken").unwrap();

        let index = VectorIndex::open(&layout).unwrap();
        assert_eq!(index.stats().count, 0);

        let salvaged = fs::read_dir(layout.vector_index_file().parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".bad."));
        assert!(salvaged);
    }

    #[test]
    fn test_newer_schema_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path()).unwrap();
        fs::write(
            layout.vector_index_file(),
            serde_json::json!({"schema_version": 99, "dim": null, "entries": []}).to_string(),
        )
        .unwrap();

        let index = VectorIndex::open(&layout).unwrap();
        let err = index
            .put("r1", vec![chunk(0, "a", vec![1.0])], meta())
            .unwrap_err();
        assert!(matches!(err, VectorError::UpgradeRequired(_)));
    }
}
