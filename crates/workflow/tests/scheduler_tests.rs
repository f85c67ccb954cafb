//! End-to-end scheduler tests against in-process mock collaborators.

use async_trait::async_trait;
use recordroute_engines::{
    EmbeddingEngine, EngineError, GenerateOptions, ProgressFn, SttEngine, SummaryEngine,
    TranscribeOptions,
};
use recordroute_events::{ProgressBus, StepKind, TerminalKind};
use recordroute_history::{FileType, HistoryStore, Record};
use recordroute_jobs::JobRegistry;
use recordroute_storage::DataLayout;
use recordroute_vector::{DateRange, VectorIndex};
use recordroute_workflow::{
    ErrorCode, ProcessRequest, Scheduler, StepOutcome, StepRequest, WorkflowSettings,
    SUMMARY_SECTIONS,
};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// STT mock: returns a fixed transcript after an optional delay, polling
/// the token every 50 ms like a real collaborator.
struct FixedStt {
    text: String,
    delay: Duration,
}

#[async_trait]
impl SttEngine for FixedStt {
    async fn transcribe(
        &self,
        _source: &Path,
        _options: &TranscribeOptions,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> recordroute_engines::Result<String> {
        progress(0, "mock transcription started");
        let mut waited = Duration::ZERO;
        while waited < self.delay {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let step = Duration::from_millis(50).min(self.delay - waited);
            tokio::time::sleep(step).await;
            waited += step;
        }
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        progress(100, "mock transcription finished");
        Ok(self.text.clone())
    }
}

/// STT mock that always fails fatally.
struct BrokenStt;

#[async_trait]
impl SttEngine for BrokenStt {
    async fn transcribe(
        &self,
        _source: &Path,
        _options: &TranscribeOptions,
        _token: &CancellationToken,
        _progress: ProgressFn<'_>,
    ) -> recordroute_engines::Result<String> {
        Err(EngineError::Fatal("model file is corrupt".to_string()))
    }
}

/// Deterministic embedder: vector from character-class frequencies.
struct HashEmbedder {
    dim: usize,
}

#[async_trait]
impl EmbeddingEngine for HashEmbedder {
    async fn embed(&self, text: &str) -> recordroute_engines::Result<Vec<f32>> {
        let mut v = vec![0.1f32; self.dim];
        for (i, c) in text.chars().enumerate() {
            v[(c as usize + i) % self.dim] += 1.0;
        }
        Ok(v)
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

/// Summarizer mock: emits the structured sections for final prompts, short
/// echoes otherwise. Optionally fails transiently a few times first.
struct MockSummarizer {
    transient_failures: AtomicU32,
    calls: AtomicU32,
}

impl MockSummarizer {
    fn new() -> Self {
        Self::flaky(0)
    }

    fn flaky(failures: u32) -> Self {
        Self {
            transient_failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SummaryEngine for MockSummarizer {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> recordroute_engines::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Transient("backend warming up".to_string()));
        }
        if prompt.contains("meeting minutes") {
            let body = SUMMARY_SECTIONS
                .iter()
                .map(|s| format!("## {s}\n- mock item"))
                .collect::<Vec<_>>()
                .join("\n\n");
            Ok(body)
        } else {
            Ok("a short mock summary line".to_string())
        }
    }
}

struct Harness {
    _dir: TempDir,
    layout: DataLayout,
    history: Arc<HistoryStore>,
    vector: Arc<VectorIndex>,
    bus: ProgressBus,
    registry: Arc<JobRegistry>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path()).unwrap();
        let history = Arc::new(HistoryStore::open(layout.clone()).unwrap());
        let vector = Arc::new(VectorIndex::open(&layout).unwrap());
        Self {
            _dir: dir,
            layout,
            history,
            vector,
            bus: ProgressBus::new(),
            registry: Arc::new(JobRegistry::new()),
        }
    }

    fn scheduler(
        &self,
        stt: Arc<dyn SttEngine>,
        summarizer: Arc<dyn SummaryEngine>,
    ) -> Arc<Scheduler> {
        let settings = WorkflowSettings {
            retry_base: Duration::from_millis(5),
            ..WorkflowSettings::default()
        };
        Arc::new(Scheduler::new(
            self.layout.clone(),
            Arc::clone(&self.history),
            Arc::clone(&self.vector),
            self.bus.clone(),
            Arc::clone(&self.registry),
            stt,
            Arc::new(HashEmbedder { dim: 16 }),
            summarizer,
            settings,
        ))
    }

    /// Write a source file and create its record.
    fn upload(&self, name: &str, contents: &str, file_type: FileType) -> Record {
        let path = self.layout.new_upload_path(name).unwrap();
        std::fs::write(&path, contents).unwrap();
        let relative = self.layout.relativize(&path).unwrap();
        self.history
            .create_record(relative, file_type, name.to_string(), None)
            .unwrap()
    }
}

fn default_scheduler(harness: &Harness) -> Arc<Scheduler> {
    harness.scheduler(
        Arc::new(FixedStt {
            text: "the quarterly budget was approved after a long discussion".to_string(),
            delay: Duration::ZERO,
        }),
        Arc::new(MockSummarizer::new()),
    )
}

#[tokio::test]
async fn test_stt_step_writes_artifact_and_marks_history() {
    let harness = Harness::new();
    let scheduler = default_scheduler(&harness);
    let record = harness.upload("meeting.wav", "fake-wav-bytes", FileType::Audio);

    let outcome = scheduler
        .process(ProcessRequest::new(record.record_id.clone(), [StepKind::Stt]))
        .await;

    match outcome.get(StepKind::Stt).unwrap() {
        StepOutcome::Succeeded { artifact_url } => {
            assert_eq!(*artifact_url, format!("/download/{}.stt", record.record_id));
        }
        other => panic!("expected success, got {other:?}"),
    }

    let fetched = harness.history.get(&record.record_id).unwrap();
    assert!(fetched.completed_tasks.stt);
    let artifact = harness
        .layout
        .resolve(fetched.artifact_paths.get(&StepKind::Stt).unwrap());
    let contents = std::fs::read_to_string(artifact).unwrap();
    assert!(contents.contains("quarterly budget"));
}

#[tokio::test]
async fn test_empty_transcript_still_succeeds() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(
        Arc::new(FixedStt {
            text: String::new(),
            delay: Duration::ZERO,
        }),
        Arc::new(MockSummarizer::new()),
    );
    let record = harness.upload("silence.wav", "fake", FileType::Audio);

    let outcome = scheduler
        .process(ProcessRequest::new(record.record_id.clone(), [StepKind::Stt]))
        .await;
    assert!(outcome.all_succeeded());

    let fetched = harness.history.get(&record.record_id).unwrap();
    let artifact = harness
        .layout
        .resolve(fetched.artifact_paths.get(&StepKind::Stt).unwrap());
    assert!(std::fs::read_to_string(artifact).unwrap().trim().is_empty());
}

#[tokio::test]
async fn test_embedding_after_stt_populates_vector_index() {
    let harness = Harness::new();
    let scheduler = default_scheduler(&harness);
    let record = harness.upload("meeting.wav", "fake", FileType::Audio);

    let outcome = scheduler
        .process(ProcessRequest::new(
            record.record_id.clone(),
            [StepKind::Stt, StepKind::Embedding],
        ))
        .await;
    assert!(outcome.all_succeeded(), "{:?}", outcome.steps);

    let stats = harness.vector.stats();
    assert_eq!(stats.records, 1);
    assert!(stats.count >= 1);

    // Searching with a chunk's own embedding must find the record at the top.
    let embedder = HashEmbedder { dim: 16 };
    let query = embedder
        .embed("the quarterly budget was approved after a long discussion")
        .await
        .unwrap();
    let hits = harness.vector.search(&query, 3, DateRange::default());
    assert_eq!(hits[0].record_id, record.record_id);
    assert!(hits[0].score >= 0.999);

    let fetched = harness.history.get(&record.record_id).unwrap();
    assert!(fetched.completed_tasks.embedding);
    assert!(fetched.title_summary.is_some());
}

#[tokio::test]
async fn test_summary_without_stt_reports_dependency_not_met() {
    let harness = Harness::new();
    let scheduler = default_scheduler(&harness);
    let record = harness.upload("meeting.wav", "fake", FileType::Audio);

    let outcome = scheduler
        .process(ProcessRequest::new(record.record_id.clone(), [StepKind::Summary]))
        .await;

    match outcome.get(StepKind::Summary).unwrap() {
        StepOutcome::Failed { code, .. } => assert_eq!(*code, ErrorCode::SttDependencyNotMet),
        other => panic!("expected dependency failure, got {other:?}"),
    }
    assert!(harness.registry.is_empty(), "no task may be registered");
}

#[tokio::test]
async fn test_stt_then_summary_in_one_request() {
    let harness = Harness::new();
    let scheduler = default_scheduler(&harness);
    let record = harness.upload("meeting.wav", "fake", FileType::Audio);

    let outcome = scheduler
        .process(ProcessRequest::new(
            record.record_id.clone(),
            [StepKind::Stt, StepKind::Summary],
        ))
        .await;
    assert!(outcome.all_succeeded(), "{:?}", outcome.steps);

    let fetched = harness.history.get(&record.record_id).unwrap();
    let artifact = harness
        .layout
        .resolve(fetched.artifact_paths.get(&StepKind::Summary).unwrap());
    let summary = std::fs::read_to_string(artifact).unwrap();

    // All six sections, in order.
    let mut last = 0;
    for section in SUMMARY_SECTIONS {
        let pos = summary
            .find(&format!("## {section}"))
            .unwrap_or_else(|| panic!("missing section {section}"));
        assert!(pos >= last, "section {section} out of order");
        last = pos;
    }
}

#[tokio::test]
async fn test_cancellation_leaves_no_trace() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(
        Arc::new(FixedStt {
            text: "never delivered".to_string(),
            delay: Duration::from_secs(30),
        }),
        Arc::new(MockSummarizer::new()),
    );
    let record = harness.upload("meeting.wav", "fake", FileType::Audio);
    let mut subscription = harness.bus.subscribe();

    let request = ProcessRequest {
        record_id: record.record_id.clone(),
        steps: vec![StepRequest::with_task_id(StepKind::Stt, "task-under-test")],
        stt_model: None,
        summary_model: None,
    };
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.process(request).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(harness.registry.cancel("task-under-test"));

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancellation must unblock the request promptly")
        .unwrap();
    assert!(matches!(
        outcome.get(StepKind::Stt).unwrap(),
        StepOutcome::Cancelled
    ));

    // The last event for the task is terminal `cancelled`; HTTP and the bus
    // come from the same outcome.
    let mut terminal = None;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await
    {
        if event.task_id == "task-under-test" && event.is_terminal() {
            terminal = event.terminal;
        }
    }
    assert_eq!(terminal, Some(TerminalKind::Cancelled));

    // No artifact, no completion flag, no registry entry.
    let fetched = harness.history.get(&record.record_id).unwrap();
    assert!(!fetched.completed_tasks.stt);
    assert!(fetched.artifact_paths.is_empty());
    assert!(harness.registry.is_empty());
    let artifact = harness.layout.artifact_path(&record.record_id, StepKind::Stt);
    assert!(!artifact.exists());
}

#[tokio::test]
async fn test_duplicate_task_rejected() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(
        Arc::new(FixedStt {
            text: "slow transcript".to_string(),
            delay: Duration::from_millis(500),
        }),
        Arc::new(MockSummarizer::new()),
    );
    let record = harness.upload("meeting.wav", "fake", FileType::Audio);

    let first = {
        let scheduler = Arc::clone(&scheduler);
        let id = record.record_id.clone();
        tokio::spawn(async move { scheduler.process(ProcessRequest::new(id, [StepKind::Stt])).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = scheduler
        .process(ProcessRequest::new(record.record_id.clone(), [StepKind::Stt]))
        .await;
    match second.get(StepKind::Stt).unwrap() {
        StepOutcome::Failed { code, .. } => assert_eq!(*code, ErrorCode::DuplicateTask),
        other => panic!("expected duplicate rejection, got {other:?}"),
    }

    assert!(first.await.unwrap().all_succeeded());
}

#[tokio::test]
async fn test_failed_predecessor_aborts_dependent_step() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(Arc::new(BrokenStt), Arc::new(MockSummarizer::new()));
    let record = harness.upload("meeting.wav", "fake", FileType::Audio);

    let outcome = scheduler
        .process(ProcessRequest::new(
            record.record_id.clone(),
            [StepKind::Stt, StepKind::Summary],
        ))
        .await;

    match outcome.get(StepKind::Stt).unwrap() {
        StepOutcome::Failed { code, .. } => assert_eq!(*code, ErrorCode::EngineFailure),
        other => panic!("expected engine failure, got {other:?}"),
    }
    match outcome.get(StepKind::Summary).unwrap() {
        StepOutcome::Failed { code, .. } => assert_eq!(*code, ErrorCode::PredecessorFailed),
        other => panic!("expected predecessor failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transient_failures_retried_until_success() {
    let harness = Harness::new();
    let summarizer = Arc::new(MockSummarizer::flaky(2));
    let scheduler = harness.scheduler(
        Arc::new(FixedStt {
            text: "short transcript".to_string(),
            delay: Duration::ZERO,
        }),
        Arc::clone(&summarizer) as Arc<dyn SummaryEngine>,
    );
    let record = harness.upload("notes.txt", "plain text notes to summarize", FileType::Text);

    let outcome = scheduler
        .process(ProcessRequest::new(record.record_id.clone(), [StepKind::Summary]))
        .await;
    assert!(outcome.all_succeeded(), "{:?}", outcome.steps);
    assert!(summarizer.calls.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_missing_record_fails_without_side_effects() {
    let harness = Harness::new();
    let scheduler = default_scheduler(&harness);

    let outcome = scheduler
        .process(ProcessRequest::new("no-such-record", [StepKind::Stt]))
        .await;
    match outcome.get(StepKind::Stt).unwrap() {
        StepOutcome::Failed { code, .. } => assert_eq!(*code, ErrorCode::FileNotFound),
        other => panic!("expected not-found, got {other:?}"),
    }
    assert!(harness.registry.is_empty());
}

#[tokio::test]
async fn test_embed_missing_sweeps_pending_records() {
    let harness = Harness::new();
    let scheduler = default_scheduler(&harness);

    let a = harness.upload("a.wav", "fake", FileType::Audio);
    let b = harness.upload("b.wav", "fake", FileType::Audio);
    for record in [&a, &b] {
        let outcome = scheduler
            .process(ProcessRequest::new(record.record_id.clone(), [StepKind::Stt]))
            .await;
        assert!(outcome.all_succeeded());
    }
    assert_eq!(harness.vector.stats().records, 0);

    let processed = scheduler.embed_missing().await;
    assert_eq!(processed, 2);
    assert_eq!(harness.vector.stats().records, 2);

    // Idempotent: nothing left to embed.
    assert_eq!(scheduler.embed_missing().await, 0);
}

#[tokio::test]
async fn test_text_record_summary_needs_no_transcript() {
    let harness = Harness::new();
    let scheduler = default_scheduler(&harness);
    let record = harness.upload("notes.txt", "decisions were made about hiring", FileType::Text);

    let outcome = scheduler
        .process(ProcessRequest::new(
            record.record_id.clone(),
            [StepKind::Embedding, StepKind::Summary],
        ))
        .await;
    assert!(outcome.all_succeeded(), "{:?}", outcome.steps);
    assert!(harness.vector.contains(&record.record_id));
}
