/// Final-stage reranking of the merged candidate list.
///
/// Candidates are scored by an external cross-encoder in batches issued with
/// bounded concurrency. If the service is disabled or fails, the configured
/// fallback applies: lexical scoring, or keeping the incoming order. Candidates
/// are never dropped because of a rerank failure.

pub mod cross_encoder;
pub mod fallback;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cross_encoder::HttpCrossEncoder;
pub use fallback::lexical_score;

use crate::chunk::Chunk;
use crate::collection::CollectionCategory;
use crate::config::{CollectionsConfig, RerankerConfig};
use crate::retry::{RetryPolicy, Transient, is_transient_status};
use crate::trace::{DebugTrace, Stage};

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("Rerank request failed: {0}")]
    Request(String),

    #[error("Rerank API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rerank timeout: {0}")]
    Timeout(String),

    #[error("Invalid rerank response: {0}")]
    InvalidResponse(String),
}

impl Transient for RerankError {
    fn is_transient(&self) -> bool {
        match self {
            RerankError::Api { status, .. } => is_transient_status(*status),
            RerankError::Timeout(_) => true,
            RerankError::Request(_) | RerankError::InvalidResponse(_) => false,
        }
    }
}

/// Transform applied to raw cross-encoder scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Sigmoid,
    None,
}

impl Activation {
    pub fn apply(self, score: f64) -> f64 {
        match self {
            Activation::Sigmoid => 1.0 / (1.0 + (-score).exp()),
            Activation::None => score,
        }
    }
}

/// Behavior when the cross-encoder cannot score the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankFallback {
    /// Score with `lexical_score`
    Lexical,
    /// Keep the pre-rerank order and leave `rerank_score` unset
    Passthrough,
}

/// Query/passage relevance scoring service.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One raw score per passage, in input order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f64>, RerankError>;

    fn model_name(&self) -> &str;
}

pub struct Reranker {
    encoder: Option<Arc<dyn CrossEncoder>>,
    config: RerankerConfig,
    collections: CollectionsConfig,
    retry: RetryPolicy,
}

impl Reranker {
    pub fn new(
        encoder: Option<Arc<dyn CrossEncoder>>,
        config: RerankerConfig,
        collections: CollectionsConfig,
        retry: RetryPolicy,
    ) -> Self {
        Reranker {
            encoder,
            config,
            collections,
            retry,
        }
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    /// Whether category weights are applied (see `rerank_weighted`).
    pub fn weighted(&self) -> bool {
        self.config.weighted
    }

    /// Rerank `candidates` (first `max_candidates` only) and keep the best `top_k`.
    pub async fn rerank(&self, query: &str, candidates: Vec<Chunk>, top_k: usize, trace: &mut DebugTrace) -> Vec<Chunk> {
        self.rerank_inner(query, candidates, top_k, false, trace).await
    }

    /// Like `rerank`, but multiplies each score by its collection category weight
    /// (catalog vs. listing) before the final sort.
    pub async fn rerank_weighted(
        &self,
        query: &str,
        candidates: Vec<Chunk>,
        top_k: usize,
        trace: &mut DebugTrace,
    ) -> Vec<Chunk> {
        self.rerank_inner(query, candidates, top_k, true, trace).await
    }

    async fn rerank_inner(
        &self,
        query: &str,
        mut candidates: Vec<Chunk>,
        top_k: usize,
        weighted: bool,
        trace: &mut DebugTrace,
    ) -> Vec<Chunk> {
        if candidates.is_empty() {
            return candidates;
        }
        if candidates.len() > self.config.max_candidates {
            trace.push(
                Stage::Rerank,
                format!("trimmed {} candidates to {}", candidates.len(), self.config.max_candidates),
            );
            candidates.truncate(self.config.max_candidates);
        }

        let scores = match self.model_scores(query, &candidates, trace).await {
            Some(scores) => Some(scores),
            None => match self.config.fallback {
                RerankFallback::Lexical => {
                    trace.push(Stage::Rerank, "using lexical fallback scores");
                    Some(candidates.iter().map(|c| lexical_score(query, &c.text)).collect())
                }
                RerankFallback::Passthrough => {
                    trace.push(Stage::Rerank, "keeping pre-rerank order");
                    None
                }
            },
        };

        let Some(scores) = scores else {
            candidates.truncate(top_k);
            return candidates;
        };

        for (chunk, score) in candidates.iter_mut().zip(scores) {
            let weight = if weighted { self.category_weight(chunk.collection()) } else { 1.0 };
            chunk.rerank_score = Some(score * weight);
        }
        candidates.sort_by(|a, b| {
            b.rerank_score
                .unwrap_or(0.0)
                .total_cmp(&a.rerank_score.unwrap_or(0.0))
        });
        candidates.truncate(top_k);
        trace.push(Stage::Rerank, format!("kept top {}", candidates.len()));
        candidates
    }

    /// Activated cross-encoder scores, or `None` when the service is unavailable.
    async fn model_scores(&self, query: &str, candidates: &[Chunk], trace: &mut DebugTrace) -> Option<Vec<f64>> {
        if !self.config.enabled {
            return None;
        }
        let encoder = self.encoder.as_ref()?;
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let batch_size = self.config.batch_size.max(1);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let retry = self.retry;

        let owned_batches: Vec<Vec<String>> = texts.chunks(batch_size).map(|b| b.to_vec()).collect();
        let batches = owned_batches.into_iter().map(|batch: Vec<String>| {
            let encoder = Arc::clone(encoder);
            async move {
                retry
                    .run("rerank batch", || async {
                        match tokio::time::timeout(timeout, encoder.score(query, &batch)).await {
                            Ok(result) => result,
                            Err(_) => Err(RerankError::Timeout(format!("no response within {:?}", timeout))),
                        }
                    })
                    .await
                    .and_then(|scores| {
                        if scores.len() == batch.len() {
                            Ok(scores)
                        } else {
                            Err(RerankError::InvalidResponse(format!(
                                "expected {} scores, got {}",
                                batch.len(),
                                scores.len()
                            )))
                        }
                    })
            }
        });

        let result: Result<Vec<Vec<f64>>, RerankError> = stream::iter(batches)
            .buffered(self.config.max_concurrency.max(1))
            .try_collect()
            .await;

        match result {
            Ok(batches) => {
                let activation = self.config.activation;
                let scores: Vec<f64> = batches.into_iter().flatten().map(|s| activation.apply(s)).collect();
                trace.push(
                    Stage::Rerank,
                    format!("{} scored {} candidates", encoder.model_name(), scores.len()),
                );
                Some(scores)
            }
            Err(e) => {
                tracing::warn!(error = %e, model = encoder.model_name(), "Cross-encoder failed, using fallback");
                trace.push(Stage::Rerank, format!("cross-encoder failed: {}", e));
                None
            }
        }
    }

    fn category_weight(&self, collection: &str) -> f64 {
        match self.collections.kind(collection).map(|k| k.category()) {
            Some(CollectionCategory::Catalog) => self.config.catalog_weight,
            Some(CollectionCategory::Listing) => self.config.listing_weight,
            Some(CollectionCategory::General) | None => 1.0,
        }
    }
}
