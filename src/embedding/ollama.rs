/// Ollama embedding provider
///
/// Calls the Ollama /api/embeddings endpoint (one prompt per request).
/// No API key required; targets self-hosted Ollama deployments.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EmbeddingError, EmbeddingProvider, transport_error};

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingProvider {
    /// Create a new OllamaEmbeddingProvider.
    ///
    /// # Arguments
    /// * `base_url` - Ollama server base URL (e.g., "http://localhost:11434")
    /// * `model` - Embedding model name (e.g., "nomic-embed-text")
    /// * `timeout` - Per-request deadline
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(OllamaEmbeddingProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = OllamaEmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Api { status, message: body });
        }

        let parsed: OllamaEmbedResponse = response.json().await.map_err(|e| {
            EmbeddingError::Generation(format!("Failed to parse Ollama response: {}", e))
        })?;

        // Ollama answers 200 with an empty vector when the model cannot embed.
        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::Generation(
                "Ollama returned an empty embedding".to_string(),
            ));
        }
        Ok(parsed.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
