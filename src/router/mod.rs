/// Query routing: decide which collections a question should search.
///
/// Four modes (keyword, semantic, LLM, hybrid) produce a ranked candidate list.
/// Contextual augmentation is applied on top regardless of mode, and the result
/// is deduplicated and capped. Any failure in the semantic or LLM paths degrades
/// to keyword routing and is recorded in the debug trace.

pub mod context;
pub mod keyword;
pub mod llm;
pub mod semantic;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use context::{ConversationTurn, enrich_query};

use crate::collection::CollectionKind;
use crate::config::{AliasConfig, CollectionsConfig, RouterConfig};
use crate::embedding::EmbeddingProvider;
use crate::llm::{CompletionOptions, LlmProvider};
use crate::student::StudentContext;
use crate::trace::{DebugTrace, Stage};
use semantic::SemanticRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMethod {
    Keyword,
    Semantic,
    Llm,
    Hybrid,
}

impl fmt::Display for RoutingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMethod::Keyword => write!(f, "keyword"),
            RoutingMethod::Semantic => write!(f, "semantic"),
            RoutingMethod::Llm => write!(f, "llm"),
            RoutingMethod::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for RoutingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keyword" => Ok(RoutingMethod::Keyword),
            "semantic" => Ok(RoutingMethod::Semantic),
            "llm" => Ok(RoutingMethod::Llm),
            "hybrid" => Ok(RoutingMethod::Hybrid),
            other => Err(format!(
                "unknown routing method '{}': expected keyword, semantic, llm, or hybrid",
                other
            )),
        }
    }
}

/// Outcome of routing one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Collection names to search, highest priority first
    pub collections: Vec<String>,
    /// Query text used downstream (enriched with conversation context when needed)
    pub query: String,
    /// Mode that actually produced the candidate list
    pub method: RoutingMethod,
}

const MINOR_TERMS: &[&str] = &["minor", "minors"];

pub struct QueryRouter {
    config: RouterConfig,
    collections: CollectionsConfig,
    aliases: AliasConfig,
    semantic: Option<SemanticRouter>,
    llm: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
}

impl QueryRouter {
    /// `embedder` enables semantic/hybrid routing and `llm` enables LLM routing;
    /// without them those modes fall back to keyword routing.
    pub fn new(
        config: RouterConfig,
        collections: CollectionsConfig,
        aliases: AliasConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        llm: Option<Arc<dyn LlmProvider>>,
        timeout: Duration,
    ) -> Self {
        QueryRouter {
            config,
            collections,
            aliases,
            semantic: embedder.map(SemanticRouter::new),
            llm,
            timeout,
        }
    }

    pub fn method(&self) -> RoutingMethod {
        self.config.method
    }

    /// Route with the configured method.
    pub async fn route(
        &self,
        query: &str,
        history: &[ConversationTurn],
        student: &StudentContext,
        trace: &mut DebugTrace,
    ) -> RoutingDecision {
        self.route_with(self.config.method, query, history, student, trace)
            .await
    }

    /// Route with an explicit method.
    pub async fn route_with(
        &self,
        method: RoutingMethod,
        query: &str,
        history: &[ConversationTurn],
        student: &StudentContext,
        trace: &mut DebugTrace,
    ) -> RoutingDecision {
        let enriched = enrich_query(
            query,
            history,
            self.config.context_turns,
            self.config.short_query_tokens,
            &self.aliases,
        );
        if enriched != query {
            trace.push(Stage::Routing, format!("enriched query: {}", enriched));
        }

        let (candidates, used) = match method {
            RoutingMethod::Keyword => (self.keyword(&enriched, trace), RoutingMethod::Keyword),
            RoutingMethod::Semantic => {
                match self.semantic(&enriched, self.config.semantic_threshold, trace).await {
                    Some(found) if !found.is_empty() => (found, RoutingMethod::Semantic),
                    Some(_) => {
                        trace.push(Stage::Routing, "no collection above semantic threshold");
                        (self.keyword(&enriched, trace), RoutingMethod::Keyword)
                    }
                    None => (self.keyword(&enriched, trace), RoutingMethod::Keyword),
                }
            }
            RoutingMethod::Llm => match self.llm(&enriched, student, trace).await {
                Some(found) => (found, RoutingMethod::Llm),
                None => (self.keyword(&enriched, trace), RoutingMethod::Keyword),
            },
            RoutingMethod::Hybrid => {
                match self.semantic(&enriched, self.config.hybrid_threshold, trace).await {
                    Some(found) if !found.is_empty() => (found, RoutingMethod::Semantic),
                    _ => (self.keyword(&enriched, trace), RoutingMethod::Keyword),
                }
            }
        };

        let collections = self.augment(candidates, &enriched, student, trace);
        tracing::info!(
            method = %used,
            collections = ?collections,
            "Routed query"
        );
        trace.push(
            Stage::Routing,
            format!("{} routing selected [{}]", used, collections.join(", ")),
        );

        RoutingDecision {
            collections,
            query: enriched,
            method: used,
        }
    }

    fn keyword(&self, query: &str, trace: &mut DebugTrace) -> Vec<String> {
        let ranked = keyword::rank(query);
        if ranked.is_empty() {
            trace.push(
                Stage::Routing,
                "no keyword matches, using default collections",
            );
            return self.config.default_collections.clone();
        }
        ranked
            .into_iter()
            .map(|(kind, _)| self.collections.name(kind).to_string())
            .collect()
    }

    /// `None` when semantic routing is unavailable or failed.
    async fn semantic(&self, query: &str, threshold: f32, trace: &mut DebugTrace) -> Option<Vec<String>> {
        let Some(ref semantic) = self.semantic else {
            trace.push(Stage::Routing, "semantic routing unavailable (no embedding provider)");
            return None;
        };
        match tokio::time::timeout(self.timeout, semantic.rank(query, threshold)).await {
            Ok(Ok(ranked)) => Some(
                ranked
                    .into_iter()
                    .map(|(kind, _)| self.collections.name(kind).to_string())
                    .collect(),
            ),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Semantic routing failed, falling back to keywords");
                trace.push(Stage::Routing, format!("semantic routing failed: {}", e));
                None
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Semantic routing timed out");
                trace.push(Stage::Routing, "semantic routing timed out");
                None
            }
        }
    }

    /// `None` when LLM routing is unavailable, failed, or parsed to nothing.
    async fn llm(&self, query: &str, student: &StudentContext, trace: &mut DebugTrace) -> Option<Vec<String>> {
        let Some(ref provider) = self.llm else {
            trace.push(Stage::Routing, "llm routing unavailable (no llm provider)");
            return None;
        };
        let prompt = llm::build_routing_prompt(query, student, &self.collections);
        let options = CompletionOptions::default();
        match tokio::time::timeout(self.timeout, provider.complete(&prompt, &options)).await {
            Ok(Ok(answer)) => {
                let parsed = llm::parse_routing_answer(&answer, &self.collections);
                if parsed.is_empty() {
                    trace.push(Stage::Routing, format!("llm answer had no known collections: {:?}", answer.trim()));
                    None
                } else {
                    Some(parsed)
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, model = provider.model_name(), "LLM routing failed, falling back to keywords");
                trace.push(Stage::Routing, format!("llm routing failed: {}", e));
                None
            }
            Err(_) => {
                trace.push(Stage::Routing, "llm routing timed out");
                None
            }
        }
    }

    /// Contextual additions, dedupe in first-seen order, cap.
    fn augment(
        &self,
        candidates: Vec<String>,
        query: &str,
        student: &StudentContext,
        trace: &mut DebugTrace,
    ) -> Vec<String> {
        let major = self.collections.name(CollectionKind::MajorCatalog).to_string();
        let plans = self.collections.name(CollectionKind::YearPlan);
        let minor = self.collections.name(CollectionKind::MinorCatalog).to_string();

        let mut out: Vec<String> = Vec::with_capacity(candidates.len() + 2);
        for c in candidates {
            if !out.contains(&c) {
                out.push(c);
            }
        }

        if out.iter().any(|c| c == plans) && !out.contains(&major) {
            trace.push(Stage::Routing, format!("added {} alongside {}", major, plans));
            out.push(major);
        }

        if student.has_minor() && !out.contains(&minor) && self.mentions_minor(query, student) {
            trace.push(Stage::Routing, format!("added {} for declared minor", minor));
            out.push(minor);
        }

        if out.is_empty() {
            out = if self.config.default_collections.is_empty() {
                vec![self.collections.name(CollectionKind::GeneralKnowledge).to_string()]
            } else {
                self.config.default_collections.clone()
            };
            trace.push(Stage::Routing, format!("nothing selected, using [{}]", out.join(", ")));
        }

        if out.len() > self.config.max_collections {
            trace.push(
                Stage::Routing,
                format!("capped {} collections to {}", out.len(), self.config.max_collections),
            );
            out.truncate(self.config.max_collections);
        }
        out
    }

    fn mentions_minor(&self, query: &str, student: &StudentContext) -> bool {
        let lower = query.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.iter().any(|w| MINOR_TERMS.contains(w)) {
            return true;
        }
        let declared = student.minor.as_deref().map(|m| m.trim().to_lowercase());
        let code = student.minor_code(&self.aliases);
        [declared, code]
            .into_iter()
            .flatten()
            .filter(|name| name.len() > 2)
            .any(|name| lower.contains(&name))
    }
}
