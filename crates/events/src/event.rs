//! Progress event model shared between the scheduler and subscribers.
//!
//! This is the single source of truth for progress data. Frontend clients
//! mirror these shapes over the WebSocket feed.

use serde::{Deserialize, Serialize};

/// One processing step that can be scheduled for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Speech-to-text transcription.
    Stt,
    /// Chunk embedding into the vector index.
    Embedding,
    /// Structured meeting summary.
    Summary,
}

impl StepKind {
    /// All step kinds in canonical execution order.
    pub const ALL: [StepKind; 3] = [StepKind::Stt, StepKind::Embedding, StepKind::Summary];

    /// Stable lowercase name used in wire payloads and artifact paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Stt => "stt",
            StepKind::Embedding => "embedding",
            StepKind::Summary => "summary",
        }
    }

    /// Parse the wire name back into a step kind.
    pub fn parse(s: &str) -> Option<StepKind> {
        match s {
            "stt" => Some(StepKind::Stt),
            "embedding" => Some(StepKind::Embedding),
            "summary" => Some(StepKind::Summary),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a task, delivered exactly once as the last event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Succeeded,
    Failed,
    Cancelled,
}

impl TerminalKind {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalKind::Succeeded)
    }
}

/// A single progress update for one task.
///
/// Producers: scheduler and engine collaborators (via the scheduler).
/// Consumers: WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Task this event belongs to.
    pub task_id: String,
    /// Human-readable status line.
    pub message: String,
    /// Completion percentage in `0..=100`, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    /// Present only on the final event of a task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalKind>,
}

impl ProgressEvent {
    /// Plain status message without a percentage.
    pub fn message(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            message: message.into(),
            percent: None,
            terminal: None,
        }
    }

    /// Status message with a completion percentage.
    pub fn percent(
        task_id: impl Into<String>,
        message: impl Into<String>,
        percent: u8,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            message: message.into(),
            percent: Some(percent.min(100)),
            terminal: None,
        }
    }

    /// Final event for a task.
    pub fn terminal(
        task_id: impl Into<String>,
        message: impl Into<String>,
        kind: TerminalKind,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            message: message.into(),
            percent: if kind.is_success() { Some(100) } else { None },
            terminal: Some(kind),
        }
    }

    /// Whether this is the last event the task will publish.
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_roundtrip() {
        for kind in StepKind::ALL {
            assert_eq!(StepKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StepKind::parse("bogus"), None);
    }

    #[test]
    fn test_step_kind_wire_name() {
        let json = serde_json::to_string(&StepKind::Embedding).unwrap();
        assert_eq!(json, "\"embedding\"");
    }

    #[test]
    fn test_event_omits_empty_fields() {
        let event = ProgressEvent::message("t1", "working");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("percent").is_none());
        assert!(json.get("terminal").is_none());
    }

    #[test]
    fn test_terminal_event_shape() {
        let event = ProgressEvent::terminal("t1", "done", TerminalKind::Succeeded);
        assert!(event.is_terminal());
        assert_eq!(event.percent, Some(100));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["terminal"], "succeeded");
    }

    #[test]
    fn test_percent_clamped() {
        let event = ProgressEvent::percent("t1", "late", 180);
        assert_eq!(event.percent, Some(100));
    }
}
