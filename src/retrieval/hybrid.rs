/// Hybrid search over a single collection.
///
/// The dense leg embeds the query and asks the vector store for nearest neighbors;
/// the sparse leg scores the collection's BM25 index on a blocking thread. Both legs
/// run concurrently, each bounded by the stage timeout, and are fused with RRF.
/// A failing or slow leg contributes nothing rather than failing the search.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::chunk::Chunk;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::errors::RetrievalError;
use crate::retry::RetryPolicy;
use crate::search::{FusionParams, SparseIndexSet, reciprocal_rank_fusion};
use crate::trace::{DebugTrace, Stage};
use crate::vector_store::{SearchFilter, VectorStore, VectorStoreError, payload_to_chunk};

/// Query text plus its embedding, computed at most once per request and shared by
/// every collection search.
pub struct SearchQuery {
    text: String,
    vector: OnceCell<Result<Arc<Vec<f32>>, String>>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        SearchQuery {
            text: text.into(),
            vector: OnceCell::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

pub struct DenseRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl DenseRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        DenseRetriever {
            embedder,
            store,
            retry,
            timeout,
        }
    }

    /// Embedding for `query`. A failure is remembered for the rest of the request so
    /// the remaining collections do not retry a service that is already down.
    async fn embed(&self, query: &SearchQuery) -> Result<Arc<Vec<f32>>, RetrievalError> {
        let embedder = &self.embedder;
        let text = query.text.as_str();
        let timeout = self.timeout;
        let result = query
            .vector
            .get_or_init(|| async move {
                self.retry
                    .run("embed query", || async move {
                        match tokio::time::timeout(timeout, embedder.embed(text)).await {
                            Ok(result) => result,
                            Err(_) => Err(EmbeddingError::Timeout(format!("no response within {:?}", timeout))),
                        }
                    })
                    .await
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .await;
        result.clone().map_err(RetrievalError::EmbeddingFailure)
    }

    /// Filtered nearest-neighbor search; each returned chunk carries `score_dense`.
    pub async fn search(
        &self,
        query: &SearchQuery,
        collection: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Chunk>, RetrievalError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed(query).await?;
        let store = &self.store;
        let timeout = self.timeout;
        let vector = vector.as_slice();

        let hits = self
            .retry
            .run("vector query", || async move {
                match tokio::time::timeout(timeout, store.query(collection, vector, filter, limit)).await {
                    Ok(result) => result,
                    Err(_) => Err(VectorStoreError::Timeout(format!("no response within {:?}", timeout))),
                }
            })
            .await?;

        let mut chunks = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = hit.score;
            match payload_to_chunk(collection, hit.payload) {
                Some(mut chunk) => {
                    chunk.score_dense = Some(score);
                    chunks.push(chunk);
                }
                None => {
                    tracing::debug!(collection, point = %hit.id, "Skipping vector hit without text");
                }
            }
        }
        chunks.truncate(limit);
        Ok(chunks)
    }
}

pub struct HybridSearcher {
    dense: DenseRetriever,
    sparse: Arc<SparseIndexSet>,
    fusion: FusionParams,
    k_dense: usize,
    k_sparse: usize,
    sparse_enabled: bool,
    timeout: Duration,
}

impl HybridSearcher {
    pub fn new(
        dense: DenseRetriever,
        sparse: Arc<SparseIndexSet>,
        config: &crate::config::FusionConfig,
        timeout: Duration,
    ) -> Self {
        HybridSearcher {
            dense,
            sparse,
            fusion: FusionParams::from(config),
            k_dense: config.k_dense,
            k_sparse: config.k_sparse,
            sparse_enabled: config.sparse_enabled,
            timeout,
        }
    }

    pub fn sparse(&self) -> &Arc<SparseIndexSet> {
        &self.sparse
    }

    /// Fused results for one collection under one filter, at most `limit` long.
    pub async fn search(
        &self,
        query: &SearchQuery,
        collection: &str,
        filter: &SearchFilter,
        limit: usize,
        trace: &mut DebugTrace,
    ) -> Vec<Chunk> {
        if limit == 0 {
            return Vec::new();
        }
        let dense_depth = self.k_dense.max(limit);
        let sparse_depth = self.k_sparse.max(limit);

        let (dense, sparse) = tokio::join!(
            self.dense.search(query, collection, filter, dense_depth),
            self.sparse_leg(query.text(), collection, filter, sparse_depth),
        );

        let dense = match dense {
            Ok(chunks) => {
                trace.push(
                    Stage::Dense,
                    format!("{} [{}]: {} hits", collection, filter.describe(), chunks.len()),
                );
                chunks
            }
            Err(e) => {
                tracing::warn!(collection, error = %e, "Dense retrieval failed");
                trace.push(Stage::Dense, format!("{}: {} ({})", collection, e.kind(), e));
                Vec::new()
            }
        };

        let sparse = match sparse {
            Ok(Some(chunks)) => {
                trace.push(
                    Stage::Sparse,
                    format!("{} [{}]: {} hits", collection, filter.describe(), chunks.len()),
                );
                chunks
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                if matches!(e, RetrievalError::IndexNotBuilt { .. }) {
                    tracing::debug!(collection, "No BM25 index, dense only");
                } else {
                    tracing::warn!(collection, error = %e, "Sparse retrieval failed");
                }
                trace.push(Stage::Sparse, format!("{}: {} ({})", collection, e.kind(), e));
                Vec::new()
            }
        };

        if dense.is_empty() && sparse.is_empty() {
            return Vec::new();
        }
        let (dense_len, sparse_len) = (dense.len(), sparse.len());
        let mut fused = reciprocal_rank_fusion(dense, sparse, &self.fusion);
        fused.truncate(limit);
        tracing::debug!(
            collection,
            dense = dense_len,
            sparse = sparse_len,
            count = fused.len(),
            "Fused hybrid results"
        );
        trace.push(
            Stage::Fusion,
            format!("{}: fused {} dense + {} sparse -> {}", collection, dense_len, sparse_len, fused.len()),
        );
        fused
    }

    /// BM25 hits honoring `filter`; `Ok(None)` when the sparse leg is disabled.
    async fn sparse_leg(
        &self,
        query: &str,
        collection: &str,
        filter: &SearchFilter,
        depth: usize,
    ) -> Result<Option<Vec<Chunk>>, RetrievalError> {
        if !self.sparse_enabled {
            return Ok(None);
        }
        let index = self.sparse.get(collection)?;
        let query = query.to_string();
        let filter = filter.clone();

        let task = tokio::task::spawn_blocking(move || {
            if filter.is_empty() {
                index.search(&query, depth)
            } else {
                // Metadata filters cannot be pushed into BM25 scoring; rank everything
                // and keep the matching documents.
                index
                    .search(&query, index.len())
                    .into_iter()
                    .filter(|c| filter.matches(&c.metadata))
                    .take(depth)
                    .collect()
            }
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(chunks)) => Ok(Some(chunks)),
            Ok(Err(e)) => Err(RetrievalError::Io(format!("BM25 search task failed: {}", e))),
            Err(_) => Err(RetrievalError::Io(format!(
                "BM25 search exceeded {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkMetadata, MatchSource};
    use crate::config::FusionConfig;
    use crate::search::Bm25Params;
    use crate::vector_store::{FilterField, VectorHit};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingEmbedder {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EmbeddingError::Generation("model missing".to_string()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    /// Returns its fixture points in order, honoring the filter.
    struct FixtureStore {
        points: Vec<Map<String, Value>>,
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
            Ok(self
                .points
                .iter()
                .filter_map(|p| payload_to_chunk(collection, p.clone()).map(|c| (p, c)))
                .filter(|(_, c)| filter.matches(&c.metadata))
                .take(limit)
                .enumerate()
                .map(|(i, (p, _))| VectorHit {
                    id: i.to_string(),
                    score: 0.9 - i as f64 * 0.1,
                    payload: p.clone(),
                })
                .collect())
        }
    }

    fn point(text: &str, program: &str, year: &str) -> Map<String, Value> {
        match json!({"text": text, "program": program, "year": year}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn chunk(text: &str, program: &str, year: &str) -> Chunk {
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

    fn searcher(embedder: Arc<CountingEmbedder>, sparse: Arc<SparseIndexSet>) -> HybridSearcher {
        let store = Arc::new(FixtureStore {
            points: vec![
                point("CS majors complete CPSC 350 and CPSC 353", "cs", "2024"),
                point("Data science majors complete DS 210", "ds", "2024"),
            ],
        });
        let dense = DenseRetriever::new(embedder, store, RetryPolicy::none(), Duration::from_secs(5));
        HybridSearcher::new(dense, sparse, &FusionConfig::default(), Duration::from_secs(5))
    }

    fn sparse_set() -> Arc<SparseIndexSet> {
        let set = SparseIndexSet::new(Bm25Params::default());
        set.insert(crate::search::BM25Index::build(
            "major_catalogs",
            vec![
                chunk("CS majors complete CPSC 350 and CPSC 353", "cs", "2024"),
                chunk("CPSC 350 is offered every fall", "cs", "2023"),
            ],
            Bm25Params::default(),
        ));
        Arc::new(set)
    }

    #[tokio::test]
    async fn test_both_legs_fuse_and_respect_filter() {
        let embedder = Arc::new(CountingEmbedder { calls: AtomicU32::new(0), fail: false });
        let searcher = searcher(embedder, sparse_set());
        let query = SearchQuery::new("CPSC 353 requirements");
        let filter = SearchFilter::new()
            .with(FilterField::Program, "cs")
            .with(FilterField::CatalogYear, "2024");
        let mut trace = DebugTrace::new();

        let results = searcher.search(&query, "major_catalogs", &filter, 5, &mut trace).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_source, Some(MatchSource::Hybrid));
        assert!(results[0].score_dense.is_some());
        assert!(results[0].score_sparse.is_some());
        assert_eq!(trace.stage(Stage::Fusion).count(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_sparse_results() {
        let embedder = Arc::new(CountingEmbedder { calls: AtomicU32::new(0), fail: true });
        let searcher = searcher(Arc::clone(&embedder), sparse_set());
        let query = SearchQuery::new("CPSC 353 fall");
        let mut trace = DebugTrace::new();

        let results = searcher
            .search(&query, "major_catalogs", &SearchFilter::new(), 5, &mut trace)
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|c| c.match_source == Some(MatchSource::SparseOnly)));
        assert!(trace.stage(Stage::Dense).any(|e| e.message.contains("embedding_failure")));

        // The failure is remembered for the rest of the request
        searcher
            .search(&query, "major_catalogs", &SearchFilter::new(), 5, &mut trace)
            .await;
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_index_degrades_to_dense_only() {
        let embedder = Arc::new(CountingEmbedder { calls: AtomicU32::new(0), fail: false });
        let searcher = searcher(embedder, Arc::new(SparseIndexSet::new(Bm25Params::default())));
        let query = SearchQuery::new("majors");
        let mut trace = DebugTrace::new();

        let results = searcher
            .search(&query, "major_catalogs", &SearchFilter::new(), 1, &mut trace)
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_source, Some(MatchSource::DenseOnly));
        assert!(trace.stage(Stage::Sparse).any(|e| e.message.contains("index_not_built")));
    }

    #[tokio::test]
    async fn test_zero_limit_skips_services() {
        let embedder = Arc::new(CountingEmbedder { calls: AtomicU32::new(0), fail: false });
        let searcher = searcher(Arc::clone(&embedder), sparse_set());
        let mut trace = DebugTrace::new();
        let results = searcher
            .search(&SearchQuery::new("anything"), "major_catalogs", &SearchFilter::new(), 0, &mut trace)
            .await;
        assert!(results.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(trace.is_empty());
    }
}
