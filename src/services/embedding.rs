//! Embedding service adapter
//!
//! The embedding model is an opaque remote service: it receives a model
//! identifier plus one chunk of text and answers with a fixed-length float
//! vector. [`OllamaEmbedder`] talks to an Ollama server; stages only see the
//! [`EmbeddingProvider`] trait.
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Produces one embedding vector per text
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` with `model`
    async fn embed(&self, model: &str, text: &str) -> AppResult<Vec<f32>>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: String,
    #[serde(default)]
    model: String,
}

/// Ollama embedding provider
#[derive(Clone)]
pub struct OllamaEmbedder {
    http_client: HttpClient,
    base_url: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fails unless `model` is installed on the server
    pub async fn ensure_model(&self, model: &str) -> AppResult<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::Embedding(format!(
                "listing models returned status {}",
                status
            )));
        }

        let tags: TagsResponse = response.json().await?;
        if tags.models.iter().any(|m| m.matches(model)) {
            tracing::info!(model = %model, "Embedding model available");
            Ok(())
        } else {
            Err(AppError::Embedding(format!("model '{}' not found", model)))
        }
    }
}

impl ModelTag {
    /// Ollama reports `name:tag`; a bare model name matches its `latest` tag
    fn matches(&self, model: &str) -> bool {
        [self.name.as_str(), self.model.as_str()]
            .iter()
            .any(|candidate| *candidate == model || *candidate == format!("{}:latest", model))
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, model: &str, text: &str) -> AppResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&EmbeddingRequest {
                model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Embedding request failed");
            return Err(AppError::Embedding(format!(
                "service returned status {}: {}",
                status, body
            )));
        }

        let body: EmbeddingResponse = response.json().await?;
        if body.embedding.is_empty() {
            return Err(AppError::Embedding("service returned an empty vector".to_string()));
        }

        tracing::trace!(model = %model, dimensions = body.embedding.len(), "Embedded chunk");
        Ok(body.embedding)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
