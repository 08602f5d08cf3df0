/// Embedding provider trait and supporting types
///
/// Provides a pluggable interface to the external embedding service.
/// Supports Ollama (default, self-hosted) and OpenAI-compatible APIs.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{Transient, is_transient_status};

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Embedding generation failure (transport or response parsing)
    #[error("Embedding generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Request exceeded its deadline
    #[error("Embedding timeout: {0}")]
    Timeout(String),
}

impl Transient for EmbeddingError {
    fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Api { status, .. } => is_transient_status(*status),
            EmbeddingError::Timeout(_) => true,
            EmbeddingError::Generation(_) | EmbeddingError::NotConfigured(_) => false,
        }
    }
}

/// Map a reqwest transport error, keeping timeouts distinguishable.
pub(crate) fn transport_error(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Timeout(e.to_string())
    } else if e.is_connect() {
        // Connection refused/reset is worth a retry; the service may be restarting.
        EmbeddingError::Api { status: 503, message: format!("connection failed: {}", e) }
    } else {
        EmbeddingError::Generation(format!("HTTP request failed: {}", e))
    }
}

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn EmbeddingProvider>).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for several texts, in input order.
    ///
    /// The default implementation embeds one text at a time; providers with a
    /// native batch endpoint override it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Return the model name identifier (e.g., "nomic-embed-text").
    fn model_name(&self) -> &str;
}

/// Cosine similarity; 0.0 when either vector has zero norm or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Component-wise mean of equally sized vectors; `None` for empty or ragged input.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }
    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    mean.iter_mut().for_each(|m| *m /= n);
    Some(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_mean_vector() {
        let mean = mean_vector(&[vec![1.0, 3.0], vec![3.0, 5.0]]).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);
        assert!(mean_vector(&[]).is_none());
        assert!(mean_vector(&[vec![1.0], vec![1.0, 2.0]]).is_none());
    }

    #[test]
    fn test_transient_classification() {
        assert!(EmbeddingError::Api { status: 502, message: String::new() }.is_transient());
        assert!(!EmbeddingError::Api { status: 401, message: String::new() }.is_transient());
        assert!(EmbeddingError::Timeout("t".into()).is_transient());
        assert!(!EmbeddingError::NotConfigured("k".into()).is_transient());
    }
}
