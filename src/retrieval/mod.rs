/// Retrieval orchestrator: the end-to-end pipeline behind every search.
///
/// route -> allocate budgets -> search every selected collection concurrently ->
/// fill the general-knowledge shortfall -> concatenate in routing order, dedupe by
/// `ChunkId`, cap -> rerank. Each stage degrades on its own and records what it did
/// in the `DebugTrace` returned with the result.

pub mod filters;
pub mod hybrid;
pub mod strategy;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use filters::FilterPolicy;
pub use hybrid::{DenseRetriever, HybridSearcher, SearchQuery};
pub use strategy::{RetrievalStrategy, StrategyTable, StudentFilters};

use crate::budget::{ChunkBudget, ChunkBudgetAllocator};
use crate::chunk::{Chunk, RetrievedChunk};
use crate::collection::CollectionKind;
use crate::config::{AliasConfig, CollectionsConfig, Config};
use crate::embedding::EmbeddingProvider;
use crate::errors::RetrievalError;
use crate::llm::LlmProvider;
use crate::rerank::{CrossEncoder, Reranker};
use crate::retry::RetryPolicy;
use crate::router::{ConversationTurn, QueryRouter, RoutingDecision, RoutingMethod};
use crate::search::SparseIndexSet;
use crate::student::StudentContext;
use crate::trace::{DebugTrace, Stage};
use crate::vector_store::VectorStore;

/// External collaborators the pipeline talks to.
#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStore>,
    pub sparse: Arc<SparseIndexSet>,
    /// `None` runs the reranker's fallback scoring
    pub cross_encoder: Option<Arc<dyn CrossEncoder>>,
    /// `None` makes LLM routing fall back to keywords
    pub llm: Option<Arc<dyn LlmProvider>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RetrievalRequest {
    pub query: String,
    /// Recent conversation turns, oldest first
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub student: StudentContext,
    /// Overrides the configured routing method
    #[serde(default)]
    pub method: Option<RoutingMethod>,
    /// Overrides the reranker's `top_k`
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        RetrievalRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_student(mut self, student: StudentContext) -> Self {
        self.student = student;
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Found,
    /// Every stage ran but nothing survived
    InsufficientInformation,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub request_id: Uuid,
    pub outcome: Outcome,
    pub chunks: Vec<RetrievedChunk>,
    pub routing: RoutingDecision,
    pub budget: ChunkBudget,
    pub trace: DebugTrace,
}

pub struct RetrievalOrchestrator {
    router: QueryRouter,
    allocator: ChunkBudgetAllocator,
    searcher: HybridSearcher,
    strategies: StrategyTable,
    reranker: Reranker,
    collections: CollectionsConfig,
    aliases: AliasConfig,
    candidate_cap: usize,
}

impl RetrievalOrchestrator {
    pub fn new(config: &Config, services: Services) -> Self {
        let stage_timeout = Duration::from_millis(config.retrieval.stage_timeout_ms);
        let retry = RetryPolicy::new(config.retrieval.max_retries, config.retrieval.retry_backoff_ms);

        let router = QueryRouter::new(
            config.router.clone(),
            config.collections.clone(),
            config.aliases.clone(),
            Some(Arc::clone(&services.embedder)),
            services.llm,
            stage_timeout,
        );
        let dense = DenseRetriever::new(services.embedder, services.vector_store, retry, stage_timeout);
        let searcher = HybridSearcher::new(dense, services.sparse, &config.fusion, stage_timeout);
        let reranker = Reranker::new(
            services.cross_encoder,
            config.reranker.clone(),
            config.collections.clone(),
            retry,
        );

        RetrievalOrchestrator {
            router,
            allocator: ChunkBudgetAllocator::new(config.retrieval.clone(), config.collections.clone()),
            searcher,
            strategies: StrategyTable::new(config.plans.clone(), config.retrieval.post_filter_overfetch),
            reranker,
            collections: config.collections.clone(),
            aliases: config.aliases.clone(),
            candidate_cap: config.retrieval.candidate_cap(),
        }
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    pub fn sparse(&self) -> &Arc<SparseIndexSet> {
        self.searcher.sparse()
    }

    pub fn collections(&self) -> &CollectionsConfig {
        &self.collections
    }

    /// Run the full pipeline for one question.
    ///
    /// Only request validation and impossible budget arithmetic return `Err`;
    /// service failures degrade and show up in the trace.
    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<RetrievalResponse, RetrievalError> {
        if request.query.trim().is_empty() {
            return Err(RetrievalError::validation("query", "Query cannot be empty"));
        }
        if request.top_k == Some(0) {
            return Err(RetrievalError::validation("top_k", "top_k must be at least 1"));
        }
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let mut trace = DebugTrace::new();

        let method = request.method.unwrap_or_else(|| self.router.method());
        let routing = self
            .router
            .route_with(method, &request.query, &request.history, &request.student, &mut trace)
            .await;

        let budget = self.allocator.allocate(&routing.collections, &routing.query)?;
        trace.push(
            Stage::Budget,
            budget
                .iter()
                .map(|q| format!("{}={}", q.collection, q.quota))
                .collect::<Vec<_>>()
                .join(", "),
        );

        let student = StudentFilters::resolve(&request.student, &self.aliases);
        let query = SearchQuery::new(routing.query.clone());
        let per_collection = self.search_collections(&query, &student, &budget).await;

        let mut candidates = Vec::new();
        for (collection, chunks, collection_trace) in per_collection {
            trace.extend(collection_trace);
            candidates.push((collection, chunks));
        }
        let candidates = self.fill_general_shortfall(candidates, &budget, &mut trace);
        let candidates = self.merge(candidates, &mut trace);

        let top_k = request.top_k.unwrap_or_else(|| self.reranker.top_k());
        let ranked = if self.reranker.weighted() {
            self.reranker
                .rerank_weighted(&routing.query, candidates, top_k, &mut trace)
                .await
        } else {
            self.reranker.rerank(&routing.query, candidates, top_k, &mut trace).await
        };

        let outcome = if ranked.is_empty() {
            Outcome::InsufficientInformation
        } else {
            Outcome::Found
        };
        tracing::info!(
            request_id = %request_id,
            method = %routing.method,
            collections = ?routing.collections,
            count = ranked.len(),
            outcome = ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Retrieval complete"
        );

        Ok(RetrievalResponse {
            request_id,
            outcome,
            chunks: ranked.into_iter().map(RetrievedChunk::from).collect(),
            routing,
            budget,
            trace,
        })
    }

    /// Every budgeted collection searched concurrently, each with its own trace,
    /// returned in routing order.
    async fn search_collections(
        &self,
        query: &SearchQuery,
        student: &StudentFilters,
        budget: &ChunkBudget,
    ) -> Vec<(String, Vec<Chunk>, DebugTrace)> {
        let searches = budget.iter().map(|quota| {
            let collection = quota.collection.clone();
            let strategy = self.strategies.get(self.collections.kind(&collection));
            async move {
                let mut trace = DebugTrace::new();
                let chunks = strategy
                    .search(&self.searcher, query, &collection, student, budget, &mut trace)
                    .await;
                (collection, chunks, trace)
            }
        });
        join_all(searches).await
    }

    /// Trim general knowledge to its own quota plus whatever the other collections
    /// failed to fill.
    fn fill_general_shortfall(
        &self,
        mut candidates: Vec<(String, Vec<Chunk>)>,
        budget: &ChunkBudget,
        trace: &mut DebugTrace,
    ) -> Vec<(String, Vec<Chunk>)> {
        let general = self.collections.name(CollectionKind::GeneralKnowledge);
        let shortfall: usize = candidates
            .iter()
            .filter(|(name, _)| name != general)
            .map(|(name, chunks)| budget.get(name).saturating_sub(chunks.len()))
            .sum();

        if let Some((_, chunks)) = candidates.iter_mut().find(|(name, _)| name == general) {
            let allowed = budget.get(general) + shortfall;
            if chunks.len() > allowed {
                chunks.truncate(allowed);
            }
            trace.push(
                Stage::Merge,
                format!(
                    "{} keeps {} (quota {} + shortfall {})",
                    general,
                    chunks.len(),
                    budget.get(general),
                    shortfall
                ),
            );
        }
        candidates
    }

    /// Concatenate in routing order, drop repeated chunks, cap.
    fn merge(&self, candidates: Vec<(String, Vec<Chunk>)>, trace: &mut DebugTrace) -> Vec<Chunk> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        let mut duplicates = 0usize;
        for (_, chunks) in candidates {
            for chunk in chunks {
                if seen.insert(chunk.id) {
                    merged.push(chunk);
                } else {
                    duplicates += 1;
                }
            }
        }
        let before_cap = merged.len();
        merged.truncate(self.candidate_cap);
        trace.push(
            Stage::Merge,
            format!(
                "{} candidates ({} duplicates dropped, cap {}, {} over cap)",
                merged.len(),
                duplicates,
                self.candidate_cap,
                before_cap - merged.len()
            ),
        );
        merged
    }
}
