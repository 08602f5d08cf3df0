//! End-to-end pipeline tests against in-process fakes of the external services.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use advisor_rag::chunk::{Chunk, ChunkMetadata};
use advisor_rag::config::Config;
use advisor_rag::embedding::{EmbeddingError, EmbeddingProvider};
use advisor_rag::rerank::{CrossEncoder, RerankError};
use advisor_rag::retrieval::{Outcome, RetrievalOrchestrator, RetrievalRequest, Services};
use advisor_rag::router::RoutingMethod;
use advisor_rag::search::{BM25Index, Bm25Params, SparseIndexSet};
use advisor_rag::student::StudentContext;
use advisor_rag::trace::Stage;
use advisor_rag::vector_store::{SearchFilter, VectorHit, VectorStore, VectorStoreError};

struct FixedEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.5, 0.5, 0.5, 0.5])
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::NotConfigured("embedding service unreachable".to_string()))
    }

    fn model_name(&self) -> &str {
        "down"
    }
}

/// Applies the filter to its fixtures and returns them in insertion order.
struct FixtureStore {
    chunks: Vec<Chunk>,
}

#[async_trait]
impl VectorStore for FixtureStore {
    async fn query(
        &self,
        collection: &str,
        _vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        let hits = self
            .chunks
            .iter()
            .filter(|c| c.metadata.collection == collection && filter.matches(&c.metadata))
            .take(limit)
            .enumerate()
            .map(|(rank, c)| {
                let mut payload = match serde_json::to_value(&c.metadata) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                payload.insert("text".to_string(), Value::String(c.text.clone()));
                VectorHit {
                    id: c.id.to_string(),
                    score: 0.9 - rank as f64 * 0.1,
                    payload,
                }
            })
            .collect();
        Ok(hits)
    }
}

/// Scores a passage by whether it mentions "requirements".
struct KeywordCrossEncoder;

#[async_trait]
impl CrossEncoder for KeywordCrossEncoder {
    async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f64>, RerankError> {
        Ok(passages
            .iter()
            .map(|p| if p.contains("requirements") { 4.0 } else { -4.0 })
            .collect())
    }

    fn model_name(&self) -> &str {
        "keyword-ce"
    }
}

struct BrokenCrossEncoder;

#[async_trait]
impl CrossEncoder for BrokenCrossEncoder {
    async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f64>, RerankError> {
        Err(RerankError::Api {
            status: 400,
            message: "bad request".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "broken-ce"
    }
}

fn catalog_chunk(program: &str, year: &str, text: &str) -> Chunk {
    Chunk::new(
        text,
        ChunkMetadata {
            collection: "major_catalogs".to_string(),
            subject_code: Some(program.to_string()),
            catalog_year: Some(year.to_string()),
            ..Default::default()
        },
    )
}

fn catalog() -> Vec<Chunk> {
    vec![
        catalog_chunk("cs", "2024", "Computer Science major requirements: CPSC 230, CPSC 231 and CPSC 350."),
        catalog_chunk("cs", "2024", "Computer Science students may take electives from any department."),
        catalog_chunk("ds", "2024", "Data Science major requirements: MATH 210 and CPSC 392."),
        catalog_chunk("cs", "2023", "Older Computer Science requirements listed CPSC 353."),
    ]
}

fn sparse_over(chunks: Vec<Chunk>) -> Arc<SparseIndexSet> {
    let set = SparseIndexSet::new(Bm25Params::default());
    set.insert(BM25Index::build("major_catalogs", chunks, Bm25Params::default()));
    Arc::new(set)
}

fn keyword_config() -> Config {
    let mut config = Config::default();
    config.router.method = RoutingMethod::Keyword;
    config.retrieval.retry_backoff_ms = 0;
    config
}

fn services(embedder: Arc<dyn EmbeddingProvider>, cross_encoder: Option<Arc<dyn CrossEncoder>>) -> Services {
    Services {
        embedder,
        vector_store: Arc::new(FixtureStore { chunks: catalog() }),
        sparse: sparse_over(catalog()),
        cross_encoder,
        llm: None,
    }
}

fn cs_request() -> RetrievalRequest {
    RetrievalRequest::new("What are the CS major requirements?")
        .with_student(StudentContext::new(Some("cs"), None, None))
}

#[tokio::test]
async fn test_major_question_returns_program_catalog() {
    let embedder = Arc::new(FixedEmbedder { calls: AtomicUsize::new(0) });
    let orchestrator = RetrievalOrchestrator::new(
        &keyword_config(),
        services(embedder.clone(), Some(Arc::new(KeywordCrossEncoder))),
    );

    let response = orchestrator.retrieve(cs_request()).await.unwrap();

    assert_eq!(response.outcome, Outcome::Found);
    assert_eq!(response.routing.collections[0], "major_catalogs");
    assert!(!response.chunks.is_empty());
    assert!(response.chunks.iter().all(|c| c.collection == "major_catalogs"));
    // Exact program filter: no data science passages
    assert!(response
        .chunks
        .iter()
        .all(|c| c.metadata.subject_code.as_deref() == Some("cs")));
    // Cross-encoder puts the requirements passage first
    assert!(response.chunks[0].text.contains("requirements"));
    assert!(response.chunks[0].rerank_score.unwrap() > 0.5);
    // One query embedding per request, whatever the number of collections searched
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_same_request_same_chunks() {
    let orchestrator = RetrievalOrchestrator::new(
        &keyword_config(),
        services(
            Arc::new(FixedEmbedder { calls: AtomicUsize::new(0) }),
            Some(Arc::new(KeywordCrossEncoder)),
        ),
    );

    let first = orchestrator.retrieve(cs_request()).await.unwrap();
    let second = orchestrator.retrieve(cs_request()).await.unwrap();

    let ids = |r: &advisor_rag::retrieval::RetrievalResponse| r.chunks.iter().map(|c| c.id).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
    assert_ne!(first.request_id, second.request_id);
}

#[tokio::test]
async fn test_embedding_outage_falls_back_to_keywords() {
    let orchestrator = RetrievalOrchestrator::new(
        &keyword_config(),
        services(Arc::new(DownEmbedder), Some(Arc::new(KeywordCrossEncoder))),
    );

    let response = orchestrator.retrieve(cs_request()).await.unwrap();

    assert_eq!(response.outcome, Outcome::Found);
    assert!(response.chunks.iter().any(|c| c.text.contains("CPSC 350")));
    assert!(response
        .trace
        .stage(Stage::Dense)
        .any(|e| e.message.contains("embedding_failure")));
}

#[tokio::test]
async fn test_cross_encoder_failure_uses_lexical_scores() {
    let orchestrator = RetrievalOrchestrator::new(
        &keyword_config(),
        services(
            Arc::new(FixedEmbedder { calls: AtomicUsize::new(0) }),
            Some(Arc::new(BrokenCrossEncoder)),
        ),
    );

    let response = orchestrator.retrieve(cs_request()).await.unwrap();

    assert_eq!(response.outcome, Outcome::Found);
    assert!(response.chunks.iter().all(|c| c.rerank_score.is_some()));
    let rerank: Vec<&str> = response
        .trace
        .stage(Stage::Rerank)
        .map(|e| e.message.as_str())
        .collect();
    assert!(rerank.iter().any(|m| m.contains("cross-encoder failed")));
    assert!(rerank.iter().any(|m| m.contains("lexical fallback")));
}

#[tokio::test]
async fn test_unknown_program_relaxes_to_unfiltered() {
    let orchestrator = RetrievalOrchestrator::new(
        &keyword_config(),
        services(
            Arc::new(FixedEmbedder { calls: AtomicUsize::new(0) }),
            Some(Arc::new(KeywordCrossEncoder)),
        ),
    );

    let request = RetrievalRequest::new("What are the major requirements?")
        .with_student(StudentContext::new(Some("underwater basket weaving"), None, None));
    let response = orchestrator.retrieve(request).await.unwrap();

    assert_eq!(response.outcome, Outcome::Found);
    assert!(response
        .trace
        .stage(Stage::Strategy)
        .any(|e| e.message.contains("unfiltered")));
}

#[tokio::test]
async fn test_top_k_limits_result() {
    let orchestrator = RetrievalOrchestrator::new(
        &keyword_config(),
        services(
            Arc::new(FixedEmbedder { calls: AtomicUsize::new(0) }),
            Some(Arc::new(KeywordCrossEncoder)),
        ),
    );

    let mut request = cs_request();
    request.top_k = Some(1);
    let response = orchestrator.retrieve(request).await.unwrap();
    assert_eq!(response.chunks.len(), 1);

    let mut request = cs_request();
    request.top_k = Some(0);
    let err = orchestrator.retrieve(request).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}
