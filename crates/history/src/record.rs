//! Record model: one ingested artifact and its derived state.

use chrono::{DateTime, Utc};
use recordroute_events::StepKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current on-disk schema of `history.json`.
pub const SCHEMA_VERSION: u32 = 1;

/// Kind of ingested file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Audio,
    Pdf,
    Text,
}

impl FileType {
    /// Classify an upload by its filename extension.
    pub fn from_filename(name: &str) -> FileType {
        let ext = name
            .rsplit('.')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "wav" | "mp3" | "m4a" | "flac" | "ogg" | "aac" | "mp4" | "mov" | "webm" | "mkv" => {
                FileType::Audio
            }
            "pdf" => FileType::Pdf,
            _ => FileType::Text,
        }
    }
}

/// One user-visible ingested artifact and its derived state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Stable opaque identifier, generated on upload.
    pub record_id: String,
    /// User-editable display name.
    pub display_filename: String,
    pub file_type: FileType,
    /// Original upload, relative to the data root.
    pub source_path: String,
    pub uploaded_at: DateTime<Utc>,
    /// Audio duration when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Steps that have completed for this record.
    #[serde(default)]
    pub completed_tasks: CompletedTasks,
    /// Artifact locations per completed step, relative to the data root.
    #[serde(default)]
    pub artifact_paths: BTreeMap<StepKind, String>,
    /// One-line description produced by the summary collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_summary: Option<String>,
}

impl Record {
    pub fn new(
        source_path: String,
        file_type: FileType,
        display_filename: String,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            display_filename,
            file_type,
            source_path,
            uploaded_at: Utc::now(),
            duration_seconds,
            completed_tasks: CompletedTasks::default(),
            artifact_paths: BTreeMap::new(),
            title_summary: None,
        }
    }

    /// Directory name of the original upload under `uploads/`.
    pub fn upload_dir_name(&self) -> Option<&str> {
        let mut parts = self.source_path.split('/');
        match (parts.next(), parts.next()) {
            (Some("uploads"), Some(dir)) => Some(dir),
            _ => None,
        }
    }
}

/// Completion flags per step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTasks {
    #[serde(default)]
    pub stt: bool,
    #[serde(default)]
    pub embedding: bool,
    #[serde(default)]
    pub summary: bool,
}

impl CompletedTasks {
    pub fn get(&self, step: StepKind) -> bool {
        match step {
            StepKind::Stt => self.stt,
            StepKind::Embedding => self.embedding,
            StepKind::Summary => self.summary,
        }
    }

    pub fn set(&mut self, step: StepKind, done: bool) {
        match step {
            StepKind::Stt => self.stt = done,
            StepKind::Embedding => self.embedding = done,
            StepKind::Summary => self.summary = done,
        }
    }
}

/// On-disk shape of the history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryFile {
    pub schema_version: u32,
    pub records: Vec<Record>,
}

impl Default for HistoryFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            records: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_classification() {
        assert_eq!(FileType::from_filename("meeting.wav"), FileType::Audio);
        assert_eq!(FileType::from_filename("clip.MP4"), FileType::Audio);
        assert_eq!(FileType::from_filename("paper.pdf"), FileType::Pdf);
        assert_eq!(FileType::from_filename("notes.txt"), FileType::Text);
        assert_eq!(FileType::from_filename("no_extension"), FileType::Text);
    }

    #[test]
    fn test_completed_tasks_accessors() {
        let mut tasks = CompletedTasks::default();
        assert!(!tasks.get(StepKind::Stt));
        tasks.set(StepKind::Stt, true);
        assert!(tasks.get(StepKind::Stt));
        assert!(!tasks.get(StepKind::Embedding));
    }

    #[test]
    fn test_upload_dir_name() {
        let record = Record::new(
            "uploads/abc-123/meeting.wav".to_string(),
            FileType::Audio,
            "meeting.wav".to_string(),
            None,
        );
        assert_eq!(record.upload_dir_name(), Some("abc-123"));
    }

    #[test]
    fn test_artifact_paths_serialize_with_step_keys() {
        let mut record = Record::new(
            "uploads/x/f.txt".to_string(),
            FileType::Text,
            "f.txt".to_string(),
            None,
        );
        record
            .artifact_paths
            .insert(StepKind::Stt, "outputs/r/r.stt.md".to_string());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["artifact_paths"]["stt"], "outputs/r/r.stt.md");
    }
}
