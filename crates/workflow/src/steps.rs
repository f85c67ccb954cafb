//! Step bodies: the work done once a task holds its slot.
//!
//! Each body polls the cancellation token at every natural checkpoint and
//! returns without touching history or the vector index when it fires.
//! Artifacts reach disk only through rename-atomic writes after the last
//! cancellation check.

use crate::prompts;
use crate::scheduler::Scheduler;
use recordroute_engines::{chunk_text, media, EngineError, GenerateOptions, TranscribeOptions};
use recordroute_events::StepKind;
use recordroute_history::{FileType, Record};
use recordroute_storage::{atomic_write, atomic_write_json};
use recordroute_vector::{ChunkEmbedding, EntryMeta, VectorError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Internal failure of one step body; the scheduler maps this onto a
/// `StepOutcome` and decides whether to retry.
#[derive(Debug)]
pub(crate) enum StepError {
    Cancelled,
    Engine(EngineError),
    Vector(VectorError),
    NotFound(String),
    Other(String),
}

impl StepError {
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, StepError::Engine(e) if e.is_transient())
    }
}

impl From<EngineError> for StepError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Cancelled => StepError::Cancelled,
            other => StepError::Engine(other),
        }
    }
}

impl From<VectorError> for StepError {
    fn from(e: VectorError) -> Self {
        StepError::Vector(e)
    }
}

impl From<recordroute_storage::StorageError> for StepError {
    fn from(e: recordroute_storage::StorageError) -> Self {
        StepError::Other(e.to_string())
    }
}

impl From<recordroute_history::HistoryError> for StepError {
    fn from(e: recordroute_history::HistoryError) -> Self {
        StepError::Other(e.to_string())
    }
}

pub(crate) type StepResult<T> = std::result::Result<T, StepError>;

/// Shape of one chunk in the embedding artifact file.
#[derive(Serialize)]
struct ChunkRecord<'a> {
    index: usize,
    text: &'a str,
}

impl Scheduler {
    /// Transcribe the record's audio and write the transcript artifact.
    pub(crate) async fn run_stt_body(
        &self,
        record: &Record,
        task_id: &str,
        token: &CancellationToken,
        model: Option<&str>,
    ) -> StepResult<()> {
        let source = self.layout.resolve(&record.source_path);
        if !source.exists() {
            return Err(StepError::NotFound(format!(
                "source file missing: {}",
                record.source_path
            )));
        }

        // Feed the collaborator 16 kHz mono WAV; decode anything else first.
        let needs_decode = source
            .extension()
            .map(|e| !e.eq_ignore_ascii_case("wav"))
            .unwrap_or(true);
        let decoded = if needs_decode {
            let dest = self
                .layout
                .record_output_dir(&record.record_id)?
                .join(format!("{}.16k.wav", record.record_id));
            self.bus.percent(task_id, "decoding audio", 5);
            media::extract_audio(&source, &dest, token).await?;
            Some(dest)
        } else {
            None
        };
        let input = decoded.as_deref().unwrap_or(&source);

        let options = TranscribeOptions {
            model: model.map(str::to_string),
            language: None,
        };
        let bus = self.bus.clone();
        let progress_task = task_id.to_string();
        let transcript = self
            .stt
            .transcribe(input, &options, token, &move |pct, msg| {
                // Engine progress occupies the 10..=90 band of the task.
                bus.percent(&progress_task, msg, 10 + (pct.min(100) as u16 * 80 / 100) as u8);
            })
            .await;

        if let Some(dest) = decoded {
            let _ = std::fs::remove_file(dest);
        }
        let transcript = transcript?;

        if token.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        self.bus.percent(task_id, "writing transcript", 92);
        let artifact = self.layout.artifact_path(&record.record_id, StepKind::Stt);
        atomic_write(&artifact, transcript.as_bytes())?;

        let relative = self
            .layout
            .relativize(&artifact)
            .unwrap_or_else(|| artifact.to_string_lossy().into_owned());
        self.history
            .mark_completed(&record.record_id, StepKind::Stt, relative)?;
        Ok(())
    }

    /// Chunk the source text, embed every chunk, and replace the record's
    /// vector entries.
    pub(crate) async fn run_embedding_body(
        &self,
        record: &Record,
        task_id: &str,
        token: &CancellationToken,
    ) -> StepResult<()> {
        self.bus.percent(task_id, "reading source text", 5);
        let text = self.source_text(record, token).await?;
        let chunks = chunk_text(&text, self.settings.chunk_chars, self.settings.chunk_overlap);

        let mut embedded = Vec::with_capacity(chunks.len());
        let total = chunks.len().max(1);
        for (i, chunk) in chunks.iter().enumerate() {
            if token.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            let vector = self.embedder.embed(chunk).await?;
            embedded.push(ChunkEmbedding {
                index: i,
                text: chunk.clone(),
                vector,
            });
            self.bus.percent(
                task_id,
                format!("embedded chunk {}/{total}", i + 1),
                10 + ((i + 1) * 70 / total) as u8,
            );
        }

        if token.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        self.vector.put(
            &record.record_id,
            embedded,
            EntryMeta {
                uploaded_at: record.uploaded_at,
                display_filename: record.display_filename.clone(),
                source_filename: source_filename(record),
            },
        )?;

        self.bus.percent(task_id, "writing chunk artifact", 90);
        let listing: Vec<ChunkRecord<'_>> = chunks
            .iter()
            .enumerate()
            .map(|(index, text)| ChunkRecord { index, text })
            .collect();
        let artifact = self
            .layout
            .artifact_path(&record.record_id, StepKind::Embedding);
        atomic_write_json(&artifact, &listing)?;

        let relative = self
            .layout
            .relativize(&artifact)
            .unwrap_or_else(|| artifact.to_string_lossy().into_owned());
        self.history
            .mark_completed(&record.record_id, StepKind::Embedding, relative)?;

        // One-line title for listings. Best-effort: a collaborator hiccup
        // here must not fail an otherwise complete embedding run.
        if record.title_summary.is_none() && !text.trim().is_empty() {
            match self
                .summarizer
                .generate(&prompts::one_line_title(&text), &GenerateOptions::default())
                .await
            {
                Ok(title) => {
                    let title = title.lines().next().unwrap_or("").trim().to_string();
                    if !title.is_empty() {
                        if let Err(e) = self.history.set_title_summary(&record.record_id, title) {
                            tracing::warn!(record_id = %record.record_id, error = %e, "failed to store title");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(record_id = %record.record_id, error = %e, "one-line title generation failed");
                }
            }
        }
        Ok(())
    }

    /// Produce the structured summary, map-reducing long transcripts.
    pub(crate) async fn run_summary_body(
        &self,
        record: &Record,
        task_id: &str,
        token: &CancellationToken,
        model: Option<&str>,
    ) -> StepResult<()> {
        self.bus.percent(task_id, "reading source text", 5);
        let text = self.source_text(record, token).await?;

        let options = GenerateOptions {
            model: model.map(str::to_string),
            temperature: None,
        };

        let summary = if text.chars().count() <= self.settings.summary_single_pass_chars {
            self.bus.percent(task_id, "summarizing", 20);
            self.summarizer
                .generate(&prompts::structured_summary(&text), &options)
                .await?
        } else {
            self.map_reduce_summary(&text, task_id, token, &options)
                .await?
        };

        if token.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        let summary = prompts::ensure_sections(&summary);
        self.bus.percent(task_id, "writing summary", 92);
        let artifact = self
            .layout
            .artifact_path(&record.record_id, StepKind::Summary);
        atomic_write(&artifact, summary.as_bytes())?;

        let relative = self
            .layout
            .relativize(&artifact)
            .unwrap_or_else(|| artifact.to_string_lossy().into_owned());
        self.history
            .mark_completed(&record.record_id, StepKind::Summary, relative)?;

        if record.title_summary.is_none() {
            match self
                .summarizer
                .generate(&prompts::one_line_title(&summary), &options)
                .await
            {
                Ok(title) => {
                    let title = title.lines().next().unwrap_or("").trim().to_string();
                    if !title.is_empty() {
                        if let Err(e) = self.history.set_title_summary(&record.record_id, title) {
                            tracing::warn!(record_id = %record.record_id, error = %e, "failed to store title");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(record_id = %record.record_id, error = %e, "one-line title generation failed");
                }
            }
        }
        Ok(())
    }

    /// Map: one partial per chunk. Reduce: combine at most `reduce_batch`
    /// partials per pass until a single text remains, then shape it into the
    /// structured form.
    async fn map_reduce_summary(
        &self,
        text: &str,
        task_id: &str,
        token: &CancellationToken,
        options: &GenerateOptions,
    ) -> StepResult<String> {
        let chunks = chunk_text(text, self.settings.chunk_chars, self.settings.chunk_overlap);
        let total = chunks.len().max(1);

        let mut partials = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if token.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            let partial = self
                .summarizer
                .generate(&prompts::partial_summary(chunk, i, total), options)
                .await?;
            partials.push(partial);
            self.bus.percent(
                task_id,
                format!("summarized section {}/{total}", i + 1),
                10 + ((i + 1) * 50 / total) as u8,
            );
        }

        while partials.len() > 1 {
            if token.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            self.bus.percent(
                task_id,
                format!("combining {} partial summaries", partials.len()),
                70,
            );
            let batch_size = self.settings.reduce_batch.max(1);
            let mut reduced = Vec::with_capacity(partials.len().div_ceil(batch_size));
            for batch in partials.chunks(batch_size) {
                if token.is_cancelled() {
                    return Err(StepError::Cancelled);
                }
                let combined = self
                    .summarizer
                    .generate(&prompts::combine_partials(batch), options)
                    .await?;
                reduced.push(combined);
            }
            partials = reduced;
        }

        let merged = partials.pop().unwrap_or_default();
        self.bus.percent(task_id, "writing final summary", 85);
        let summary = self
            .summarizer
            .generate(&prompts::structured_summary(&merged), options)
            .await?;
        Ok(summary)
    }

    /// Text a derived step works on: the transcript for audio, the extract
    /// for PDF, the file itself for plain text.
    async fn source_text(&self, record: &Record, token: &CancellationToken) -> StepResult<String> {
        match record.file_type {
            FileType::Audio => {
                let relative = record
                    .artifact_paths
                    .get(&StepKind::Stt)
                    .ok_or_else(|| StepError::NotFound("transcript artifact missing".to_string()))?;
                let path = self.layout.resolve(relative);
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| StepError::Other(format!("failed to read transcript: {e}")))
            }
            FileType::Pdf => {
                let source = self.layout.resolve(&record.source_path);
                Ok(media::extract_pdf_text(&source, token).await?)
            }
            FileType::Text => {
                let source = self.layout.resolve(&record.source_path);
                tokio::fs::read_to_string(&source)
                    .await
                    .map_err(|e| StepError::Other(format!("failed to read source: {e}")))
            }
        }
    }
}

fn source_filename(record: &Record) -> String {
    record
        .source_path
        .rsplit('/')
        .next()
        .unwrap_or(&record.source_path)
        .to_string()
}
