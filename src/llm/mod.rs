/// LLM completion provider trait and supporting types
///
/// Only the query router's LLM mode talks to an LLM; answer generation is a
/// separate collaborator. Supports Ollama (local, default, no API key) and
/// OpenAI-compatible APIs.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during completion calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport or response parse failure
    #[error("LLM generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key or model)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Operation exceeded latency budget
    #[error("LLM timeout: {0}")]
    Timeout(String),
}

pub(crate) fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(e.to_string())
    } else {
        LlmError::Generation(format!("HTTP request failed: {}", e))
    }
}

/// Sampling options for a single completion.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        CompletionOptions {
            temperature: 0.1,
            max_tokens: 30,
        }
    }
}

/// Core trait for single-turn text completion.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn LlmProvider>).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, LlmError>;

    /// Return the model name identifier used by this provider.
    fn model_name(&self) -> &str;
}
