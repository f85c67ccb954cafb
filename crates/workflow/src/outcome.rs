//! Process requests and their per-step outcomes.
//!
//! A step run produces exactly one `StepOutcome`; the HTTP response and the
//! terminal progress event are both derived from it, so the two surfaces
//! can never disagree about how a task ended.

use recordroute_events::{StepKind, TerminalKind};
use serde::Serialize;

/// Stable error codes crossing the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SttDependencyNotMet,
    FileNotFound,
    NoTargetFile,
    PredecessorFailed,
    Cancelled,
    DuplicateTask,
    DimensionMismatch,
    EngineFailure,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SttDependencyNotMet => "STT_DEPENDENCY_NOT_MET",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::NoTargetFile => "NO_TARGET_FILE",
            ErrorCode::PredecessorFailed => "PREDECESSOR_FAILED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::DuplicateTask => "DUPLICATE_TASK",
            ErrorCode::DimensionMismatch => "DIMENSION_MISMATCH",
            ErrorCode::EngineFailure => "ENGINE_FAILURE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested step, with an optional client-chosen task id.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub step: StepKind,
    pub task_id: Option<String>,
}

impl StepRequest {
    pub fn new(step: StepKind) -> Self {
        Self {
            step,
            task_id: None,
        }
    }

    pub fn with_task_id(step: StepKind, task_id: impl Into<String>) -> Self {
        Self {
            step,
            task_id: Some(task_id.into()),
        }
    }
}

/// A validated request to run one or more steps on a record, in order.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub record_id: String,
    pub steps: Vec<StepRequest>,
    /// Transcription model override.
    pub stt_model: Option<String>,
    /// Generation model override.
    pub summary_model: Option<String>,
}

impl ProcessRequest {
    pub fn new(record_id: impl Into<String>, steps: impl IntoIterator<Item = StepKind>) -> Self {
        Self {
            record_id: record_id.into(),
            steps: steps.into_iter().map(StepRequest::new).collect(),
            stt_model: None,
            summary_model: None,
        }
    }
}

/// How one step run ended.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Succeeded { artifact_url: String },
    Failed { code: ErrorCode, message: String },
    Cancelled,
}

impl StepOutcome {
    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        StepOutcome::Failed {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }

    /// Terminal progress-event kind matching this outcome.
    pub fn terminal_kind(&self) -> TerminalKind {
        match self {
            StepOutcome::Succeeded { .. } => TerminalKind::Succeeded,
            StepOutcome::Failed { .. } => TerminalKind::Failed,
            StepOutcome::Cancelled => TerminalKind::Cancelled,
        }
    }

    /// Terminal progress-event message matching this outcome.
    pub fn terminal_message(&self, step: StepKind) -> String {
        match self {
            StepOutcome::Succeeded { .. } => format!("{step} completed"),
            StepOutcome::Failed { code, message } => format!("{step} failed: {code}: {message}"),
            StepOutcome::Cancelled => format!("{step} cancelled"),
        }
    }
}

/// Results of one process request, in request order.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub steps: Vec<(StepKind, StepOutcome)>,
}

impl ProcessOutcome {
    pub fn push(&mut self, step: StepKind, outcome: StepOutcome) {
        self.steps.push((step, outcome));
    }

    pub fn all_succeeded(&self) -> bool {
        self.steps.iter().all(|(_, o)| o.is_success())
    }

    /// First non-success outcome, if any.
    pub fn first_failure(&self) -> Option<(StepKind, &StepOutcome)> {
        self.steps
            .iter()
            .find(|(_, o)| !o.is_success())
            .map(|(s, o)| (*s, o))
    }

    pub fn get(&self, step: StepKind) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, o)| o)
    }
}
