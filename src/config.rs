/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: advisor-rag.toml (in working directory)
/// 3. Environment variables: prefixed ADVISOR_RAG_, nested with `__`
///    (e.g., ADVISOR_RAG_RERANKER__TOP_K=8)

use std::collections::BTreeMap;

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::collection::CollectionKind;
use crate::errors::RetrievalError;
use crate::rerank::{Activation, RerankFallback};
use crate::router::RoutingMethod;

/// Upper bound on the number of collections a single routing decision may select.
pub const MAX_ROUTED_COLLECTIONS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default)]
    pub collections: CollectionsConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub bm25: Bm25Config,

    #[serde(default)]
    pub reranker: RerankerConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub plans: PlansConfig,

    #[serde(default)]
    pub aliases: AliasConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            collections: CollectionsConfig::default(),
            retrieval: RetrievalConfig::default(),
            fusion: FusionConfig::default(),
            bm25: Bm25Config::default(),
            reranker: RerankerConfig::default(),
            router: RouterConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            vector_store: VectorStoreConfig::default(),
            plans: PlansConfig::default(),
            aliases: AliasConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: ADVISOR_RAG_LOG_LEVEL=debug overrides log_level in advisor-rag.toml
    pub fn load() -> Result<Config, RetrievalError> {
        let config: Config = Self::figment()
            .extract()
            .map_err(|e| RetrievalError::Config(format!("Failed to load config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("advisor-rag.toml"))
            .merge(Env::prefixed("ADVISOR_RAG_").split("__"))
    }

    /// Check the budget arithmetic and numeric ranges the pipeline relies on.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        let r = &self.retrieval;
        if r.total_retrieval_budget == 0 {
            return Err(RetrievalError::Config(
                "retrieval.total_retrieval_budget must be greater than 0".to_string(),
            ));
        }
        if r.min_chunks_per_collection * MAX_ROUTED_COLLECTIONS > r.total_retrieval_budget {
            return Err(RetrievalError::Config(format!(
                "retrieval.min_chunks_per_collection ({}) x {} collections exceeds total_retrieval_budget ({})",
                r.min_chunks_per_collection, MAX_ROUTED_COLLECTIONS, r.total_retrieval_budget
            )));
        }
        if r.min_chunks_per_collection > r.max_chunks_per_collection {
            return Err(RetrievalError::Config(
                "retrieval.min_chunks_per_collection must not exceed max_chunks_per_collection".to_string(),
            ));
        }
        for (name, max) in &r.collection_max {
            if *max < r.min_chunks_per_collection {
                return Err(RetrievalError::Config(format!(
                    "retrieval.collection_max.{} ({}) is below min_chunks_per_collection ({})",
                    name, max, r.min_chunks_per_collection
                )));
            }
        }
        if let Some((name, w)) = r.collection_weights.iter().find(|(_, w)| **w < 0.0) {
            return Err(RetrievalError::Config(format!(
                "retrieval.collection_weights.{} must be non-negative (got {})",
                name, w
            )));
        }
        if self.fusion.rrf_k <= 0.0 {
            return Err(RetrievalError::Config("fusion.rrf_k must be positive".to_string()));
        }
        if self.reranker.batch_size == 0 || self.reranker.max_concurrency == 0 {
            return Err(RetrievalError::Config(
                "reranker.batch_size and reranker.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.router.max_collections == 0 || self.router.max_collections > MAX_ROUTED_COLLECTIONS {
            return Err(RetrievalError::Config(format!(
                "router.max_collections must be between 1 and {}",
                MAX_ROUTED_COLLECTIONS
            )));
        }
        Ok(())
    }
}

/// Collection name table: maps each collection kind to its vector-store namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
    pub major_catalogs: String,
    pub minor_catalogs: String,
    pub year_plans: String,
    pub general_knowledge: String,
    pub course_listings: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        CollectionsConfig {
            major_catalogs: "major_catalogs".to_string(),
            minor_catalogs: "minor_catalogs".to_string(),
            year_plans: "4_year_plans".to_string(),
            general_knowledge: "general_knowledge".to_string(),
            course_listings: "course_listings".to_string(),
        }
    }
}

impl CollectionsConfig {
    /// Configured collection name for a kind.
    pub fn name(&self, kind: CollectionKind) -> &str {
        match kind {
            CollectionKind::MajorCatalog => &self.major_catalogs,
            CollectionKind::MinorCatalog => &self.minor_catalogs,
            CollectionKind::YearPlan => &self.year_plans,
            CollectionKind::GeneralKnowledge => &self.general_knowledge,
            CollectionKind::CourseListing => &self.course_listings,
        }
    }

    /// Reverse lookup; `None` for names that are not in the table.
    pub fn kind(&self, name: &str) -> Option<CollectionKind> {
        CollectionKind::ALL.into_iter().find(|k| self.name(*k) == name)
    }

    /// All configured (kind, name) pairs in catalog order.
    pub fn entries(&self) -> Vec<(CollectionKind, String)> {
        CollectionKind::ALL
            .into_iter()
            .map(|k| (k, self.name(k).to_string()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Upper bound on the sum of per-collection quotas
    pub total_retrieval_budget: usize,
    pub min_chunks_per_collection: usize,
    /// Default per-collection maximum, overridable via `collection_max`
    pub max_chunks_per_collection: usize,
    pub collection_max: BTreeMap<String, usize>,
    pub collection_weights: BTreeMap<String, f64>,
    /// Weight used for collections missing from `collection_weights`
    pub default_weight: f64,
    /// Floor for the pre-rerank candidate cap: max(total_retrieval_budget, initial_top_k)
    pub initial_top_k: usize,
    /// Per-stage timeout for external calls (embedding, vector store)
    pub stage_timeout_ms: u64,
    /// Retries for transient external failures (0 disables retrying)
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries
    pub retry_backoff_ms: u64,
    /// Over-fetch factor for the manual keyword post-filter relaxation step
    pub post_filter_overfetch: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let collection_weights = BTreeMap::from([
            ("major_catalogs".to_string(), 1.5),
            ("4_year_plans".to_string(), 1.2),
            ("minor_catalogs".to_string(), 1.0),
            ("course_listings".to_string(), 1.0),
            ("general_knowledge".to_string(), 0.8),
        ]);
        RetrievalConfig {
            total_retrieval_budget: 24,
            min_chunks_per_collection: 2,
            max_chunks_per_collection: 12,
            collection_max: BTreeMap::from([("general_knowledge".to_string(), 8)]),
            collection_weights,
            default_weight: 1.0,
            initial_top_k: 20,
            stage_timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 200,
            post_filter_overfetch: 4,
        }
    }
}

impl RetrievalConfig {
    pub fn max_for(&self, collection: &str) -> usize {
        self.collection_max
            .get(collection)
            .copied()
            .unwrap_or(self.max_chunks_per_collection)
    }

    pub fn weight_for(&self, collection: &str) -> f64 {
        self.collection_weights
            .get(collection)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Cap applied to the concatenated candidate list before reranking.
    pub fn candidate_cap(&self) -> usize {
        self.total_retrieval_budget.max(self.initial_top_k)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub rrf_k: f64,
    pub dense_weight: f64,
    pub sparse_weight: f64,
    /// Depth fetched from the dense leg before fusion
    pub k_dense: usize,
    /// Depth fetched from the sparse leg before fusion
    pub k_sparse: usize,
    /// When false, catalog searches use the dense leg only
    pub sparse_enabled: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            rrf_k: 60.0,
            dense_weight: 0.6,
            sparse_weight: 0.4,
            k_dense: 40,
            k_sparse: 40,
            sparse_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f64,
    pub b: f64,
    /// Multiplier on per-term contributions for query tokens that are course codes
    pub course_code_boost: f64,
    /// Directory holding persisted `<collection>.bm25.json` indexes
    pub index_dir: String,
}

fn default_index_dir() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("advisor-rag").join("bm25"))
        .unwrap_or_else(|| std::path::PathBuf::from("bm25_indexes"))
        .to_string_lossy()
        .into_owned()
}

impl Default for Bm25Config {
    fn default() -> Self {
        Bm25Config {
            k1: 1.2,
            b: 0.75,
            course_code_boost: 2.0,
            index_dir: default_index_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    /// When false, the lexical fallback is used without contacting the service
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub top_k: usize,
    pub batch_size: usize,
    pub max_candidates: usize,
    pub activation: Activation,
    /// Maximum cross-encoder batches in flight at once
    pub max_concurrency: usize,
    pub timeout_ms: u64,
    pub fallback: RerankFallback,
    /// Apply per-category weights after scoring
    pub weighted: bool,
    /// Weight for catalog-type collections (major, minor, plans)
    pub catalog_weight: f64,
    /// Weight for listing-type collections (course listings)
    pub listing_weight: f64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        RerankerConfig {
            enabled: true,
            base_url: "http://localhost:8080".to_string(),
            model: "BAAI/bge-reranker-v2-m3".to_string(),
            top_k: 12,
            batch_size: 32,
            max_candidates: 200,
            activation: Activation::Sigmoid,
            max_concurrency: 4,
            timeout_ms: 30_000,
            fallback: RerankFallback::Lexical,
            weighted: false,
            catalog_weight: 1.0,
            listing_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub method: RoutingMethod,
    /// Cosine threshold for semantic mode
    pub semantic_threshold: f32,
    /// Stricter cosine threshold used by the semantic leg of hybrid mode
    pub hybrid_threshold: f32,
    /// Number of recent conversation turns consulted for context enrichment
    pub context_turns: usize,
    /// Queries with at most this many tokens are enriched with conversation context
    pub short_query_tokens: usize,
    pub max_collections: usize,
    /// Collections searched when keyword routing finds nothing
    pub default_collections: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            method: RoutingMethod::Hybrid,
            semantic_threshold: 0.35,
            hybrid_threshold: 0.4,
            context_turns: 3,
            short_query_tokens: 4,
            max_collections: MAX_ROUTED_COLLECTIONS,
            default_collections: vec![
                "general_knowledge".to_string(),
                "major_catalogs".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "ollama" (default) or "openai"
    pub provider: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: "ollama".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "nomic-embed-text".to_string(),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "text-embedding-3-small".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "ollama" (default) or "openai"
    pub provider: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: "ollama".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2:1b".to_string(),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Qdrant REST base URL
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        VectorStoreConfig {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

/// Years for which a multi-year plan exists, per program code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlansConfig {
    pub available_years: BTreeMap<String, Vec<String>>,
    /// Used for programs missing from `available_years`
    pub default_years: Vec<String>,
}

impl Default for PlansConfig {
    fn default() -> Self {
        PlansConfig {
            available_years: BTreeMap::new(),
            default_years: ["2022", "2023", "2024", "2025"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl PlansConfig {
    pub fn years_for(&self, program_code: Option<&str>) -> &[String] {
        program_code
            .and_then(|p| self.available_years.get(p))
            .map(Vec::as_slice)
            .unwrap_or(&self.default_years)
    }
}

/// Alias tables mapping human names and abbreviations to canonical codes.
/// Keys are matched case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    pub programs: BTreeMap<String, String>,
    pub minors: BTreeMap<String, String>,
}

impl Default for AliasConfig {
    fn default() -> Self {
        let programs = [
            ("computer science", "cs"),
            ("cs", "cs"),
            ("comp sci", "cs"),
            ("cpsc", "cs"),
            ("computer engineering", "ce"),
            ("ce", "ce"),
            ("comp eng", "ce"),
            ("data science", "ds"),
            ("ds", "ds"),
            ("software engineering", "se"),
            ("se", "se"),
            ("soft eng", "se"),
            ("electrical engineering", "ee"),
            ("ee", "ee"),
            ("elec eng", "ee"),
        ];
        let minors = [
            ("analytics", "analytics"),
            ("data analytics", "analytics"),
            ("business", "business"),
            ("business administration", "business"),
            ("mathematics", "math"),
            ("math", "math"),
            ("computer science", "cs"),
            ("cs", "cs"),
        ];
        AliasConfig {
            programs: programs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            minors: minors
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.retrieval.total_retrieval_budget, 24);
        assert_eq!(config.fusion.rrf_k, 60.0);
        assert_eq!(config.bm25.k1, 1.2);
        assert_eq!(config.bm25.b, 0.75);
        assert_eq!(config.reranker.max_candidates, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collection_name_table_round_trips() {
        let collections = CollectionsConfig::default();
        for (kind, name) in collections.entries() {
            assert_eq!(collections.kind(&name), Some(kind));
        }
        assert_eq!(collections.kind("nonexistent"), None);
    }

    #[test]
    fn test_validate_rejects_min_budget_overflow() {
        let mut config = Config::default();
        config.retrieval.total_retrieval_budget = 5;
        config.retrieval.min_chunks_per_collection = 2;
        assert!(matches!(config.validate(), Err(RetrievalError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_max_override_below_min() {
        let mut config = Config::default();
        config.retrieval.collection_max.insert("minor_catalogs".to_string(), 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_and_weight_fallbacks() {
        let r = RetrievalConfig::default();
        assert_eq!(r.max_for("general_knowledge"), 8);
        assert_eq!(r.max_for("unknown"), r.max_chunks_per_collection);
        assert_eq!(r.weight_for("unknown"), r.default_weight);
        assert_eq!(r.candidate_cap(), 24);
    }

    #[test]
    fn test_plan_years_fallback_to_default() {
        let mut plans = PlansConfig::default();
        plans
            .available_years
            .insert("cs".to_string(), vec!["2023".to_string()]);
        assert_eq!(plans.years_for(Some("cs")), ["2023".to_string()]);
        assert_eq!(plans.years_for(Some("ee")).len(), 4);
        assert_eq!(plans.years_for(None).len(), 4);
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ADVISOR_RAG_RERANKER__TOP_K", "5");
            jail.set_env("ADVISOR_RAG_LOG_LEVEL", "debug");
            let config: Config = Config::figment().extract()?;
            assert_eq!(config.reranker.top_k, 5);
            assert_eq!(config.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "advisor-rag.toml",
                r#"
                [retrieval]
                total_retrieval_budget = 30

                [router]
                method = "keyword"
                "#,
            )?;
            let config: Config = Config::figment().extract()?;
            assert_eq!(config.retrieval.total_retrieval_budget, 30);
            assert_eq!(config.retrieval.min_chunks_per_collection, 2);
            assert_eq!(config.router.method, RoutingMethod::Keyword);
            Ok(())
        });
    }
}
