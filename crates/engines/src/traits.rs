//! Collaborator contracts driven by the scheduler.

use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Progress sink handed to long-running collaborator calls.
pub type ProgressFn<'a> = &'a (dyn Fn(u8, &str) + Send + Sync);

/// Options for a transcription run.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Model override; collaborator default when absent.
    pub model: Option<String>,
    /// Spoken-language hint.
    pub language: Option<String>,
}

/// Options for a generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Model override; collaborator default when absent.
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

/// Speech-to-text collaborator.
///
/// Implementations must observe `token` at least every ~500 ms and at every
/// natural checkpoint, returning `EngineError::Cancelled` promptly.
#[async_trait]
pub trait SttEngine: Send + Sync {
    async fn transcribe(
        &self,
        source: &Path,
        options: &TranscribeOptions,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<String>;
}

/// Embedding collaborator. Idempotent and side-effect-free.
#[async_trait]
pub trait EmbeddingEngine: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Name of the model producing the vectors.
    fn model_name(&self) -> &str;
}

/// Text-generation collaborator used for summaries.
#[async_trait]
pub trait SummaryEngine: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;
}
