//! STT collaborator backed by an external command.
//!
//! The engine itself is out of process; this adapter substitutes the source
//! path into a configured command template, captures stdout as the
//! transcript, and kills the tool when the token fires.

use crate::media::run;
use crate::traits::{ProgressFn, SttEngine, TranscribeOptions};
use crate::{EngineError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Placeholders recognized in the command template.
const INPUT_PLACEHOLDER: &str = "{input}";
const MODEL_PLACEHOLDER: &str = "{model}";
const LANGUAGE_PLACEHOLDER: &str = "{language}";

/// Runs a transcription command like
/// `["whisper-cli", "--model", "{model}", "--output", "-", "{input}"]`.
pub struct SubprocessSttEngine {
    command: Vec<String>,
    default_model: String,
    default_language: String,
}

impl SubprocessSttEngine {
    pub fn new(command: Vec<String>, default_model: String, default_language: String) -> Self {
        Self {
            command,
            default_model,
            default_language,
        }
    }

    fn render(&self, source: &Path, options: &TranscribeOptions) -> Result<Vec<String>> {
        if self.command.is_empty() {
            return Err(EngineError::Fatal("empty transcription command".to_string()));
        }
        let model = options.model.as_deref().unwrap_or(&self.default_model);
        let language = options.language.as_deref().unwrap_or(&self.default_language);
        Ok(self
            .command
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &source.to_string_lossy())
                    .replace(MODEL_PLACEHOLDER, model)
                    .replace(LANGUAGE_PLACEHOLDER, language)
            })
            .collect())
    }
}

#[async_trait]
impl SttEngine for SubprocessSttEngine {
    async fn transcribe(
        &self,
        source: &Path,
        options: &TranscribeOptions,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<String> {
        if !source.exists() {
            return Err(EngineError::Fatal(format!(
                "source file not found: {}",
                source.display()
            )));
        }

        let argv = self.render(source, options)?;
        progress(0, "transcription started");

        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        let stdout = run(&argv[0], &args, Some(token)).await?;
        let transcript = String::from_utf8_lossy(&stdout).into_owned();

        progress(100, "transcription finished");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn engine(command: &[&str]) -> SubprocessSttEngine {
        SubprocessSttEngine::new(
            command.iter().map(|s| s.to_string()).collect(),
            "base".to_string(),
            "en".to_string(),
        )
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let engine = engine(&["stt", "--model", "{model}", "--lang", "{language}", "{input}"]);
        let argv = engine
            .render(Path::new("/tmp/a.wav"), &TranscribeOptions::default())
            .unwrap();
        assert_eq!(argv, vec!["stt", "--model", "base", "--lang", "en", "/tmp/a.wav"]);
    }

    #[test]
    fn test_render_honors_overrides() {
        let engine = engine(&["stt", "{model}", "{input}"]);
        let options = TranscribeOptions {
            model: Some("large-v3".to_string()),
            language: None,
        };
        let argv = engine.render(Path::new("in.wav"), &options).unwrap();
        assert_eq!(argv[1], "large-v3");
    }

    #[tokio::test]
    async fn test_transcribe_captures_stdout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hello from the meeting").unwrap();

        let engine = engine(&["cat", "{input}"]);
        let token = CancellationToken::new();
        let transcript = engine
            .transcribe(
                file.path(),
                &TranscribeOptions::default(),
                &token,
                &|_, _| {},
            )
            .await
            .unwrap();
        assert_eq!(transcript.trim(), "hello from the meeting");
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let engine = engine(&["cat", "{input}"]);
        let token = CancellationToken::new();
        let err = engine
            .transcribe(
                Path::new("/nonexistent/file.wav"),
                &TranscribeOptions::default(),
                &token,
                &|_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Fatal(_)));
    }
}
