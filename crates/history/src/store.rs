//! The history store: exclusive owner of `history/history.json`.

use crate::record::{FileType, HistoryFile, Record, SCHEMA_VERSION};
use crate::{HistoryError, Result};
use chrono::Utc;
use recordroute_events::StepKind;
use recordroute_storage::{atomic_write, atomic_write_json, DataLayout};
use std::fs;
use std::sync::RwLock;

/// Authoritative mapping from record identity to upload, completion flags,
/// and derived artifacts.
///
/// Every mutation holds the exclusive lock while it rewrites the snapshot
/// on disk, so readers never observe a half-applied change. Reads clone.
pub struct HistoryStore {
    layout: DataLayout,
    inner: RwLock<Inner>,
}

struct Inner {
    records: Vec<Record>,
    /// Set when the on-disk schema is newer than this build supports;
    /// writes are refused until an upgraded build takes over.
    newer_schema: Option<u32>,
}

impl HistoryStore {
    /// Load the history file, salvaging a corrupt one by renaming it aside
    /// and starting empty.
    pub fn open(layout: DataLayout) -> Result<Self> {
        let path = layout.history_file();
        let mut newer_schema = None;

        let records = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HistoryFile>(&contents) {
                Ok(file) if file.schema_version > SCHEMA_VERSION => {
                    tracing::error!(
                        found = file.schema_version,
                        supported = SCHEMA_VERSION,
                        "history schema is newer than this build; refusing to write. Upgrade required."
                    );
                    newer_schema = Some(file.schema_version);
                    file.records
                }
                Ok(file) => file.records,
                Err(e) => {
                    let salvage = path.with_extension(format!("json.bad.{}", Utc::now().timestamp()));
                    tracing::warn!(
                        error = %e,
                        salvaged = %salvage.display(),
                        "corrupt history file; starting empty"
                    );
                    let _ = fs::rename(&path, &salvage);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        tracing::info!(records = records.len(), "history loaded");
        Ok(Self {
            layout,
            inner: RwLock::new(Inner {
                records,
                newer_schema,
            }),
        })
    }

    /// Append a new record and persist. Returns the created record.
    pub fn create_record(
        &self,
        source_path: String,
        file_type: FileType,
        display_filename: String,
        duration_seconds: Option<f64>,
    ) -> Result<Record> {
        let record = Record::new(source_path, file_type, display_filename, duration_seconds);
        let mut inner = self.write_lock()?;
        inner.records.push(record.clone());
        self.persist(&inner)?;
        Ok(record)
    }

    /// Snapshot of all records, newest first.
    pub fn list(&self) -> Vec<Record> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut records = inner.records.clone();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        records
    }

    pub fn get(&self, record_id: &str) -> Result<Record> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .records
            .iter()
            .find(|r| r.record_id == record_id)
            .cloned()
            .ok_or_else(|| HistoryError::NotFound(record_id.to_string()))
    }

    /// Resolve a client-supplied identifier: a record id, a source path, or
    /// a bare filename.
    pub fn resolve(&self, identifier: &str) -> Result<Record> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .records
            .iter()
            .find(|r| {
                r.record_id == identifier
                    || r.source_path == identifier
                    || r.source_path.ends_with(&format!("/{identifier}"))
                    || r.display_filename == identifier
            })
            .cloned()
            .ok_or_else(|| HistoryError::NotFound(identifier.to_string()))
    }

    /// Mark a step complete and remember where its artifact lives.
    pub fn mark_completed(
        &self,
        record_id: &str,
        step: StepKind,
        artifact_path: String,
    ) -> Result<()> {
        let mut inner = self.write_lock()?;
        let record = find_mut(&mut inner.records, record_id)?;
        record.completed_tasks.set(step, true);
        record.artifact_paths.insert(step, artifact_path);
        self.persist(&inner)
    }

    /// Store the one-line description shown in listings.
    pub fn set_title_summary(&self, record_id: &str, title: String) -> Result<()> {
        let mut inner = self.write_lock()?;
        let record = find_mut(&mut inner.records, record_id)?;
        record.title_summary = Some(title);
        self.persist(&inner)
    }

    pub fn rename(&self, record_id: &str, display_filename: String) -> Result<()> {
        let mut inner = self.write_lock()?;
        let record = find_mut(&mut inner.records, record_id)?;
        record.display_filename = display_filename;
        self.persist(&inner)
    }

    /// Clear completion flags for the given steps.
    ///
    /// Returns the root-relative artifact paths that were dropped so the
    /// caller can delete the files (and vector entries, when `embedding` is
    /// among the steps) in the same logical batch.
    pub fn reset(&self, record_id: &str, steps: &[StepKind]) -> Result<Vec<String>> {
        let mut inner = self.write_lock()?;
        let record = find_mut(&mut inner.records, record_id)?;
        let mut dropped = Vec::new();
        for &step in steps {
            record.completed_tasks.set(step, false);
            if let Some(path) = record.artifact_paths.remove(&step) {
                dropped.push(path);
            }
            if step == StepKind::Summary {
                record.title_summary = None;
            }
        }
        self.persist(&inner)?;
        Ok(dropped)
    }

    /// Clear one step across every record. Returns `(record_id, dropped
    /// artifact paths)` for each record that changed.
    pub fn reset_step_for_all(&self, step: StepKind) -> Result<Vec<(String, Vec<String>)>> {
        let mut inner = self.write_lock()?;
        let mut changed = Vec::new();
        for record in &mut inner.records {
            if !record.completed_tasks.get(step) && !record.artifact_paths.contains_key(&step) {
                continue;
            }
            record.completed_tasks.set(step, false);
            let mut dropped = Vec::new();
            if let Some(path) = record.artifact_paths.remove(&step) {
                dropped.push(path);
            }
            if step == StepKind::Summary {
                record.title_summary = None;
            }
            changed.push((record.record_id.clone(), dropped));
        }
        if !changed.is_empty() {
            self.persist(&inner)?;
        }
        Ok(changed)
    }

    /// Remove a record entirely. Returns the removed record so the caller
    /// can delete its upload, artifacts, and vector entries. Idempotent:
    /// deleting an unknown id is `Ok(None)`.
    pub fn delete(&self, record_id: &str) -> Result<Option<Record>> {
        let mut inner = self.write_lock()?;
        let Some(pos) = inner.records.iter().position(|r| r.record_id == record_id) else {
            return Ok(None);
        };
        let record = inner.records.remove(pos);
        self.persist(&inner)?;
        Ok(Some(record))
    }

    /// Overwrite the transcript artifact with edited text.
    ///
    /// Derived state is invalidated: embedding and summary flags flip to
    /// false and their artifact paths are dropped and returned for cleanup.
    pub fn update_stt_text(&self, record_id: &str, content: &str) -> Result<Vec<String>> {
        let mut inner = self.write_lock()?;
        let layout = self.layout.clone();
        let record = find_mut(&mut inner.records, record_id)?;

        let stt_path = layout.artifact_path(&record.record_id, StepKind::Stt);
        atomic_write(&stt_path, content.as_bytes())?;
        let relative = layout
            .relativize(&stt_path)
            .unwrap_or_else(|| stt_path.to_string_lossy().into_owned());
        record.completed_tasks.stt = true;
        record.artifact_paths.insert(StepKind::Stt, relative);

        let mut dropped = Vec::new();
        for step in [StepKind::Embedding, StepKind::Summary] {
            record.completed_tasks.set(step, false);
            if let Some(path) = record.artifact_paths.remove(&step) {
                dropped.push(path);
            }
        }
        record.title_summary = None;

        self.persist(&inner)?;
        Ok(dropped)
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        let inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(found) = inner.newer_schema {
            return Err(HistoryError::UpgradeRequired(found));
        }
        Ok(inner)
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        let file = HistoryFile {
            schema_version: SCHEMA_VERSION,
            records: inner.records.clone(),
        };
        atomic_write_json(&self.layout.history_file(), &file)?;
        Ok(())
    }
}

fn find_mut<'a>(records: &'a mut [Record], record_id: &str) -> Result<&'a mut Record> {
    records
        .iter_mut()
        .find(|r| r.record_id == record_id)
        .ok_or_else(|| HistoryError::NotFound(record_id.to_string()))
}
