//! The scheduler: validation, slots, retries, and task lifecycle.

use crate::outcome::{ErrorCode, ProcessOutcome, ProcessRequest, StepOutcome, StepRequest};
use crate::steps::StepError;
use recordroute_engines::{
    EmbeddingEngine, SttEngine, SummaryEngine, CHUNK_OVERLAP_CHARS, EMBEDDING_MAX_PROMPT_CHARS,
};
use recordroute_events::{ProgressBus, StepKind};
use recordroute_history::{FileType, HistoryStore, Record};
use recordroute_jobs::JobRegistry;
use recordroute_storage::DataLayout;
use recordroute_vector::{VectorError, VectorIndex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Tunables of the workflow executor.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Largest chunk handed to the embedding collaborator, in characters.
    pub chunk_chars: usize,
    /// Overlap between consecutive chunks, in characters.
    pub chunk_overlap: usize,
    /// Transcripts up to this many characters are summarized in one pass.
    pub summary_single_pass_chars: usize,
    /// Partial summaries combined per reduce pass.
    pub reduce_batch: usize,
    /// Retries after a transient collaborator failure.
    pub max_retries: u32,
    /// First backoff delay; doubles per retry.
    pub retry_base: Duration,
    /// Concurrent tasks allowed per step kind. GPU-bound steps serialize.
    pub slots_per_kind: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            chunk_chars: EMBEDDING_MAX_PROMPT_CHARS,
            chunk_overlap: CHUNK_OVERLAP_CHARS,
            summary_single_pass_chars: 12_000,
            reduce_batch: 10,
            max_retries: 3,
            retry_base: Duration::from_secs(1),
            slots_per_kind: 1,
        }
    }
}

/// Dependency-aware driver for process requests.
///
/// Owns task objects for their lifetime; all durable effects go through the
/// history store and vector index contracts.
pub struct Scheduler {
    pub(crate) layout: DataLayout,
    pub(crate) history: Arc<HistoryStore>,
    pub(crate) vector: Arc<VectorIndex>,
    pub(crate) bus: ProgressBus,
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) stt: Arc<dyn SttEngine>,
    pub(crate) embedder: Arc<dyn EmbeddingEngine>,
    pub(crate) summarizer: Arc<dyn SummaryEngine>,
    pub(crate) settings: WorkflowSettings,
    stt_slot: Arc<Semaphore>,
    embedding_slot: Arc<Semaphore>,
    summary_slot: Arc<Semaphore>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layout: DataLayout,
        history: Arc<HistoryStore>,
        vector: Arc<VectorIndex>,
        bus: ProgressBus,
        registry: Arc<JobRegistry>,
        stt: Arc<dyn SttEngine>,
        embedder: Arc<dyn EmbeddingEngine>,
        summarizer: Arc<dyn SummaryEngine>,
        settings: WorkflowSettings,
    ) -> Self {
        let slots = settings.slots_per_kind.max(1);
        Self {
            layout,
            history,
            vector,
            bus,
            registry,
            stt,
            embedder,
            summarizer,
            settings,
            stt_slot: Arc::new(Semaphore::new(slots)),
            embedding_slot: Arc::new(Semaphore::new(slots)),
            summary_slot: Arc::new(Semaphore::new(slots)),
        }
    }

    /// Run the requested steps in order and report how each ended.
    ///
    /// A failed step never aborts later steps in the request unless they
    /// depend on it; a dependent step after a failed predecessor reports
    /// `PREDECESSOR_FAILED` without starting.
    pub async fn process(&self, request: ProcessRequest) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();

        if self.history.get(&request.record_id).is_err() {
            for step_request in &request.steps {
                outcome.push(
                    step_request.step,
                    StepOutcome::failed(
                        ErrorCode::FileNotFound,
                        format!("record not found: {}", request.record_id),
                    ),
                );
            }
            return outcome;
        }

        for index in 0..request.steps.len() {
            let step_request = &request.steps[index];
            let record = match self.history.get(&request.record_id) {
                Ok(record) => record,
                Err(e) => {
                    outcome.push(
                        step_request.step,
                        StepOutcome::failed(ErrorCode::FileNotFound, e.to_string()),
                    );
                    continue;
                }
            };

            if let Err(rejection) =
                validate_step(&record, step_request.step, &request.steps[..index])
            {
                outcome.push(step_request.step, rejection);
                continue;
            }

            let step_outcome = self.run_step(&record, step_request, &request).await;
            outcome.push(step_request.step, step_outcome);
        }
        outcome
    }

    /// Embed every record whose transcript exists but whose embedding does
    /// not. Returns how many records were embedded.
    pub async fn embed_missing(&self) -> usize {
        let pending: Vec<Record> = self
            .history
            .list()
            .into_iter()
            .filter(|r| r.completed_tasks.stt && !r.completed_tasks.embedding)
            .collect();
        tracing::info!(pending = pending.len(), "incremental embedding sweep");

        let mut processed = 0;
        for record in pending {
            let request = ProcessRequest::new(record.record_id.clone(), [StepKind::Embedding]);
            if self.process(request).await.all_succeeded() {
                processed += 1;
            } else {
                tracing::warn!(record_id = %record.record_id, "incremental embedding failed");
            }
        }
        processed
    }

    async fn run_step(
        &self,
        record: &Record,
        step_request: &StepRequest,
        request: &ProcessRequest,
    ) -> StepOutcome {
        let step = step_request.step;
        let task_id = step_request
            .task_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let token = match self.registry.register(&task_id, &record.record_id, step) {
            Ok(token) => token,
            Err(e) => {
                return StepOutcome::failed(ErrorCode::DuplicateTask, e.to_string());
            }
        };
        self.bus.message(&task_id, format!("{step} queued"));

        // Fair waitlist: tasks of the same kind serialize through the slot.
        let permit = tokio::select! {
            permit = self.slot(step).clone().acquire_owned() => permit,
            _ = token.cancelled() => {
                return self.finish(&task_id, step, StepOutcome::Cancelled);
            }
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                return self.finish(
                    &task_id,
                    step,
                    StepOutcome::failed(ErrorCode::Internal, "scheduler is shutting down"),
                );
            }
        };

        self.bus.percent(&task_id, format!("{step} running"), 0);

        let mut attempt: u32 = 0;
        let outcome = loop {
            let result = match step {
                StepKind::Stt => {
                    self.run_stt_body(record, &task_id, &token, request.stt_model.as_deref())
                        .await
                }
                StepKind::Embedding => self.run_embedding_body(record, &task_id, &token).await,
                StepKind::Summary => {
                    self.run_summary_body(record, &task_id, &token, request.summary_model.as_deref())
                        .await
                }
            };

            match result {
                Ok(()) => {
                    break StepOutcome::Succeeded {
                        artifact_url: artifact_url(&record.record_id, step),
                    };
                }
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = self.settings.retry_base * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient collaborator failure; backing off"
                    );
                    self.bus.message(
                        &task_id,
                        format!("transient failure, retry {attempt} of {}", self.settings.max_retries),
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => break StepOutcome::Cancelled,
                    }
                }
                Err(e) => break outcome_from_error(e),
            }
        };

        self.finish(&task_id, step, outcome)
    }

    /// Publish the terminal event, then remove the task from the registry.
    /// The HTTP reply is derived from the same outcome, so both surfaces
    /// always agree.
    fn finish(&self, task_id: &str, step: StepKind, outcome: StepOutcome) -> StepOutcome {
        self.bus.terminal(
            task_id,
            outcome.terminal_message(step),
            outcome.terminal_kind(),
        );
        self.registry.unregister(task_id);
        outcome
    }

    fn slot(&self, step: StepKind) -> &Arc<Semaphore> {
        match step {
            StepKind::Stt => &self.stt_slot,
            StepKind::Embedding => &self.embedding_slot,
            StepKind::Summary => &self.summary_slot,
        }
    }
}

/// Precondition check run when a step's turn comes, against the record as
/// mutated by earlier steps of the same request.
fn validate_step(
    record: &Record,
    step: StepKind,
    earlier: &[StepRequest],
) -> std::result::Result<(), StepOutcome> {
    match step {
        StepKind::Stt => {
            if record.file_type != FileType::Audio {
                return Err(StepOutcome::failed(
                    ErrorCode::NoTargetFile,
                    "transcription requires an audio source",
                ));
            }
            Ok(())
        }
        StepKind::Embedding | StepKind::Summary => {
            if record.file_type == FileType::Audio && !record.completed_tasks.stt {
                // A transcription scheduled ahead of this step would have set
                // the flag by now; if it was requested, it must have failed.
                return if earlier.iter().any(|s| s.step == StepKind::Stt) {
                    Err(StepOutcome::failed(
                        ErrorCode::PredecessorFailed,
                        "transcription did not complete",
                    ))
                } else {
                    Err(StepOutcome::failed(
                        ErrorCode::SttDependencyNotMet,
                        "no transcript for this record; run stt first",
                    ))
                };
            }
            Ok(())
        }
    }
}

fn outcome_from_error(error: StepError) -> StepOutcome {
    match error {
        StepError::Cancelled => StepOutcome::Cancelled,
        StepError::NotFound(message) => StepOutcome::failed(ErrorCode::FileNotFound, message),
        StepError::Vector(VectorError::DimensionMismatch { expected, got }) => StepOutcome::failed(
            ErrorCode::DimensionMismatch,
            format!(
                "embedding dimension {got} does not match the index ({expected}); \
                 reset summary/embedding across records to migrate models"
            ),
        ),
        StepError::Vector(e) => StepOutcome::failed(ErrorCode::Internal, e.to_string()),
        StepError::Engine(e) => StepOutcome::failed(ErrorCode::EngineFailure, e.to_string()),
        StepError::Other(message) => StepOutcome::failed(ErrorCode::Internal, message),
    }
}

fn artifact_url(record_id: &str, step: StepKind) -> String {
    let kind = match step {
        StepKind::Stt => "stt",
        StepKind::Summary => "summary",
        StepKind::Embedding => "chunks",
    };
    format!("/download/{record_id}.{kind}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_url_shape() {
        assert_eq!(artifact_url("r1", StepKind::Stt), "/download/r1.stt");
        assert_eq!(artifact_url("r1", StepKind::Embedding), "/download/r1.chunks");
    }

    #[test]
    fn test_validate_rejects_stt_on_text() {
        let record = Record::new(
            "uploads/x/notes.txt".to_string(),
            FileType::Text,
            "notes.txt".to_string(),
            None,
        );
        let rejection = validate_step(&record, StepKind::Stt, &[]).unwrap_err();
        assert!(matches!(
            rejection,
            StepOutcome::Failed { code: ErrorCode::NoTargetFile, .. }
        ));
    }

    #[test]
    fn test_validate_dependency_codes() {
        let record = Record::new(
            "uploads/x/a.wav".to_string(),
            FileType::Audio,
            "a.wav".to_string(),
            None,
        );

        // Dependent step alone: client should re-queue after stt.
        let rejection = validate_step(&record, StepKind::Summary, &[]).unwrap_err();
        assert!(matches!(
            rejection,
            StepOutcome::Failed { code: ErrorCode::SttDependencyNotMet, .. }
        ));

        // Stt was requested ahead but did not complete.
        let earlier = [StepRequest::new(StepKind::Stt)];
        let rejection = validate_step(&record, StepKind::Summary, &earlier).unwrap_err();
        assert!(matches!(
            rejection,
            StepOutcome::Failed { code: ErrorCode::PredecessorFailed, .. }
        ));
    }

    #[test]
    fn test_validate_allows_derived_steps_on_text() {
        let record = Record::new(
            "uploads/x/notes.txt".to_string(),
            FileType::Text,
            "notes.txt".to_string(),
            None,
        );
        assert!(validate_step(&record, StepKind::Embedding, &[]).is_ok());
        assert!(validate_step(&record, StepKind::Summary, &[]).is_ok());
    }
}
