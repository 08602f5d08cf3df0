/// Cross-encoder client for text-embeddings-inference style `/rerank` endpoints.
///
/// Request: `{"query": ..., "texts": [...], "raw_scores": bool, "truncate": true}`.
/// Response: `[{"index": i, "score": s}, ...]` in any order.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CrossEncoder, RerankError};

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    raw_scores: bool,
    truncate: bool,
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    score: f64,
}

pub struct HttpCrossEncoder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    raw_scores: bool,
}

impl HttpCrossEncoder {
    /// `raw_scores` asks the service for logits (pair with sigmoid activation).
    pub fn new(base_url: String, model: String, raw_scores: bool, timeout: Duration) -> Result<Self, RerankError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RerankError::Request(format!("HTTP client: {}", e)))?;
        Ok(HttpCrossEncoder {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            raw_scores,
        })
    }
}

/// Place scores back in input order; every index must be present exactly once.
fn align_scores(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f64>, RerankError> {
    let mut scores: Vec<Option<f64>> = vec![None; expected];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| {
            RerankError::InvalidResponse(format!("index {} out of range for {} texts", hit.index, expected))
        })?;
        *slot = Some(hit.score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| RerankError::InvalidResponse(format!("missing score for text {}", i))))
        .collect()
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f64>, RerankError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let request = RerankRequest {
            query,
            texts: passages,
            raw_scores: self.raw_scores,
            truncate: true,
        };

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RerankError::Timeout(e.to_string())
                } else if e.is_connect() {
                    RerankError::Api { status: 503, message: format!("connection failed: {}", e) }
                } else {
                    RerankError::Request(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RerankError::Api { status, message: body });
        }

        let hits: Vec<RerankHit> = response
            .json()
            .await
            .map_err(|e| RerankError::InvalidResponse(format!("Failed to parse rerank response: {}", e)))?;
        align_scores(hits, passages.len())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
