//! Canonical path scheme under the data root.

use crate::{Result, StorageError};
use recordroute_events::StepKind;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const UPLOADS_DIR: &str = "uploads";
pub const OUTPUTS_DIR: &str = "outputs";
pub const VECTORS_DIR: &str = "vectors";
pub const HISTORY_DIR: &str = "history";
pub const LOG_DIR: &str = "log";

/// Resolves every path the core reads or writes.
///
/// Construction creates the directory skeleton eagerly; an unwritable data
/// root is fatal at startup.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [UPLOADS_DIR, OUTPUTS_DIR, VECTORS_DIR, HISTORY_DIR, LOG_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        }
        tracing::info!(root = %root.display(), "data layout ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh upload directory and return the destination path for
    /// the original file.
    pub fn new_upload_path(&self, original_filename: &str) -> Result<PathBuf> {
        let dir = self.root.join(UPLOADS_DIR).join(Uuid::new_v4().to_string());
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(dir.join(sanitize_filename(original_filename)))
    }

    /// Resolve a path stored relative to the data root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Express an absolute path under the root as a root-relative string.
    pub fn relativize(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    /// Per-record output directory, created on first access.
    pub fn record_output_dir(&self, record_id: &str) -> Result<PathBuf> {
        let dir = self.root.join(OUTPUTS_DIR).join(record_id);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(dir)
    }

    /// Absolute path of the artifact a step writes for a record. Pure path
    /// arithmetic; writers create the parent directory.
    pub fn artifact_path(&self, record_id: &str, step: StepKind) -> PathBuf {
        let name = match step {
            StepKind::Stt => format!("{record_id}.stt.md"),
            StepKind::Summary => format!("{record_id}.summary.md"),
            StepKind::Embedding => format!("{record_id}.chunks.json"),
        };
        self.root.join(OUTPUTS_DIR).join(record_id).join(name)
    }

    pub fn history_file(&self) -> PathBuf {
        self.root.join(HISTORY_DIR).join("history.json")
    }

    pub fn vector_index_file(&self) -> PathBuf {
        self.root.join(VECTORS_DIR).join("index.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("recordroute.pid")
    }

    /// Resolve an opaque artifact identifier of the form
    /// `<record_id>.<stt|summary|chunks>` or a bare record id (the original
    /// upload). Rejects anything that could escape the data root.
    pub fn download_path(&self, opaque: &str, upload_source: Option<&str>) -> Result<PathBuf> {
        if opaque.contains('/') || opaque.contains('\\') || opaque.contains("..") {
            return Err(StorageError::InvalidArtifact(opaque.to_string()));
        }
        if let Some((record_id, kind)) = opaque.rsplit_once('.') {
            let step = match kind {
                "stt" => Some(StepKind::Stt),
                "summary" => Some(StepKind::Summary),
                "chunks" => Some(StepKind::Embedding),
                _ => None,
            };
            if let Some(step) = step {
                return Ok(self.artifact_path(record_id, step));
            }
        }
        match upload_source {
            Some(relative) => Ok(self.resolve(relative)),
            None => Err(StorageError::InvalidArtifact(opaque.to_string())),
        }
    }

    /// Delete every artifact directory and upload directory that does not
    /// belong to a known record. Returns the number of directories removed.
    ///
    /// Called once at startup: a crash between a delete's sub-steps leaves
    /// directories behind, and this sweep collects them.
    pub fn sweep_orphans<'a>(
        &self,
        known_record_ids: impl Iterator<Item = &'a str> + Clone,
        known_upload_dirs: impl Iterator<Item = &'a str> + Clone,
    ) -> Result<usize> {
        let mut removed = 0;

        let outputs = self.root.join(OUTPUTS_DIR);
        removed += remove_unknown_dirs(&outputs, |name| {
            known_record_ids.clone().any(|id| id == name)
        })?;

        let uploads = self.root.join(UPLOADS_DIR);
        removed += remove_unknown_dirs(&uploads, |name| {
            known_upload_dirs.clone().any(|dir| dir == name)
        })?;

        if removed > 0 {
            tracing::info!(removed, "swept orphaned directories");
        }
        Ok(removed)
    }
}

fn remove_unknown_dirs(parent: &Path, known: impl Fn(&str) -> bool) -> Result<usize> {
    let mut removed = 0;
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !known(&name) {
            tracing::warn!(path = %path.display(), "removing orphaned directory");
            fs::remove_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Strip path separators and parent references from a client-supplied name.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .replace("..", "");
    if base.is_empty() {
        "upload.bin".to_string()
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout() -> (TempDir, DataLayout) {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path()).unwrap();
        (dir, layout)
    }

    #[test]
    fn test_creates_directory_skeleton() {
        let (_dir, layout) = layout();
        for sub in [UPLOADS_DIR, OUTPUTS_DIR, VECTORS_DIR, HISTORY_DIR, LOG_DIR] {
            assert!(layout.root().join(sub).is_dir(), "{sub} missing");
        }
    }

    #[test]
    fn test_artifact_paths_per_step() {
        let (_dir, layout) = layout();
        let stt = layout.artifact_path("r1", StepKind::Stt);
        assert!(stt.ends_with("outputs/r1/r1.stt.md"));
        let summary = layout.artifact_path("r1", StepKind::Summary);
        assert!(summary.ends_with("outputs/r1/r1.summary.md"));
        let chunks = layout.artifact_path("r1", StepKind::Embedding);
        assert!(chunks.ends_with("outputs/r1/r1.chunks.json"));
    }

    #[test]
    fn test_relativize_roundtrip() {
        let (_dir, layout) = layout();
        let path = layout.new_upload_path("meeting.wav").unwrap();
        let relative = layout.relativize(&path).unwrap();
        assert!(relative.starts_with("uploads/"));
        assert_eq!(layout.resolve(&relative), path);
    }

    #[test]
    fn test_upload_filename_sanitized() {
        let (_dir, layout) = layout();
        let path = layout.new_upload_path("../../etc/passwd").unwrap();
        assert!(path.ends_with("passwd"));
        assert!(path.starts_with(layout.root()));
    }

    #[test]
    fn test_download_path_rejects_traversal() {
        let (_dir, layout) = layout();
        assert!(layout.download_path("../history.json", None).is_err());
        assert!(layout.download_path("a/b.stt", None).is_err());
    }

    #[test]
    fn test_download_path_resolves_artifacts() {
        let (_dir, layout) = layout();
        let path = layout.download_path("r1.summary", None).unwrap();
        assert!(path.ends_with("outputs/r1/r1.summary.md"));
    }

    #[test]
    fn test_sweep_orphans_removes_unknown() {
        let (_dir, layout) = layout();
        layout.record_output_dir("keep").unwrap();
        layout.record_output_dir("drop").unwrap();

        let known = ["keep"];
        let removed = layout
            .sweep_orphans(known.iter().copied(), std::iter::empty())
            .unwrap();
        assert_eq!(removed, 1);
        assert!(layout.root().join(OUTPUTS_DIR).join("keep").is_dir());
        assert!(!layout.root().join(OUTPUTS_DIR).join("drop").exists());
    }
}
