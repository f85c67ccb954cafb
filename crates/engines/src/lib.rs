//! Engine collaborator contracts and glue.
//!
//! The STT, embedding, and summarization engines are external
//! collaborators. This crate defines the traits the scheduler drives, the
//! text chunker shared by embedding and map-reduce summarization, an HTTP
//! client for an Ollama-compatible inference backend, and the media
//! subprocess helpers (ffmpeg/ffprobe/pdftotext).

mod chunk;
mod client;
pub mod media;
mod subprocess_stt;
mod traits;

pub use chunk::{chunk_text, CHUNK_OVERLAP_CHARS, EMBEDDING_MAX_PROMPT_CHARS};
pub use client::{InferenceClient, InferenceConfig};
pub use subprocess_stt::SubprocessSttEngine;
pub use traits::{
    EmbeddingEngine, GenerateOptions, ProgressFn, SttEngine, SummaryEngine, TranscribeOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Connection refused, timeout, or 5xx from the collaborator; worth
    /// retrying with backoff.
    #[error("transient engine failure: {0}")]
    Transient(String),
    /// Malformed input, missing file, or 4xx; retrying cannot help.
    #[error("engine failure: {0}")]
    Fatal(String),
    /// The cancellation token fired mid-call.
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            return EngineError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_server_error() => EngineError::Transient(err.to_string()),
            _ => EngineError::Fatal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
