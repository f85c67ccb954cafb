//! HTTP client for an Ollama-compatible inference backend.
//!
//! Implements the embedding and summarization collaborator contracts over
//! `/api/embeddings` and `/api/generate`. Connection failures and 5xx
//! responses classify as transient so the scheduler's backoff applies;
//! everything else fails fast.

use crate::traits::{EmbeddingEngine, GenerateOptions, SummaryEngine};
use crate::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where and how to reach the inference backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL, e.g. `http://127.0.0.1:11434`.
    pub base_url: String,
    /// Default embedding model.
    pub embed_model: String,
    /// Default generation model.
    pub summary_model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            summary_model: "llama3.1".to_string(),
            timeout_secs: 600,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateTuning>,
}

#[derive(Serialize)]
struct GenerateTuning {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

/// Reqwest-backed collaborator client.
pub struct InferenceClient {
    http: reqwest::Client,
    config: InferenceConfig,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Fatal(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Models the backend currently serves.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(EngineError::from_reqwest)?
            .error_for_status()
            .map_err(EngineError::from_reqwest)?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Fatal(format!("malformed model list: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl EmbeddingEngine for InferenceClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.config.embed_model,
            prompt: text,
        };
        let response = self
            .http
            .post(self.url("/api/embeddings"))
            .json(&request)
            .send()
            .await
            .map_err(EngineError::from_reqwest)?
            .error_for_status()
            .map_err(EngineError::from_reqwest)?;
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Fatal(format!("malformed embedding response: {e}")))?;
        if body.embedding.is_empty() {
            return Err(EngineError::Fatal("backend returned an empty embedding".to_string()));
        }
        Ok(body.embedding)
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl SummaryEngine for InferenceClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let model = options.model.as_deref().unwrap_or(&self.config.summary_model);
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: options.temperature.map(|t| GenerateTuning { temperature: t }),
        };
        tracing::debug!(model, prompt_chars = prompt.len(), "generation request");

        let response = self
            .http
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await
            .map_err(EngineError::from_reqwest)?
            .error_for_status()
            .map_err(EngineError::from_reqwest)?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Fatal(format!("malformed generation response: {e}")))?;
        Ok(body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join_handles_trailing_slash() {
        let client = InferenceClient::new(InferenceConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..InferenceConfig::default()
        })
        .unwrap();
        assert_eq!(client.url("/api/tags"), "http://localhost:11434/api/tags");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let client = InferenceClient::new(InferenceConfig {
            // Reserved port that nothing listens on.
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..InferenceConfig::default()
        })
        .unwrap();

        let err = client.embed("hello").await.unwrap_err();
        assert!(err.is_transient(), "connect failure must be retriable: {err}");
    }
}
