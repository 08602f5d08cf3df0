/// OpenAI-compatible completion provider
///
/// Calls any OpenAI-compatible Chat Completions API.
/// The base_url is configurable, so any OpenAI-compatible endpoint works.
/// Requires an API key.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CompletionOptions, LlmError, LlmProvider, transport_error};

// --- HTTP request/response structs ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

// --- Provider ---

pub struct OpenAILlmProvider {
    client: reqwest::Client,
    /// Configurable base URL for OpenAI-compatible APIs
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAILlmProvider {
    /// Create a new OpenAILlmProvider.
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.openai.com/v1")
    /// * `api_key` - API key (must be non-empty)
    /// * `model` - Model name (e.g., "gpt-4o-mini")
    ///
    /// # Errors
    /// Returns `LlmError::NotConfigured` if api_key is empty.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::NotConfigured(
                "OpenAI API key is required when using the openai LLM provider. \
                 Set ADVISOR_RAG_LLM__OPENAI_API_KEY or llm.openai_api_key in advisor-rag.toml"
                    .to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(OpenAILlmProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAILlmProvider {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            return Err(LlmError::Api { status, message: body });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            LlmError::Generation(format!("Failed to parse OpenAI response: {}", e))
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Generation("OpenAI returned empty choices list".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
