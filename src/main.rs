use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use advisor_rag::chunk::{Chunk, ChunkRecord};
use advisor_rag::config::Config;
use advisor_rag::embedding::EmbeddingProvider;
use advisor_rag::embedding::ollama::OllamaEmbeddingProvider;
use advisor_rag::embedding::openai::OpenAIEmbeddingProvider;
use advisor_rag::llm::LlmProvider;
use advisor_rag::llm::ollama::OllamaLlmProvider;
use advisor_rag::llm::openai::OpenAILlmProvider;
use advisor_rag::logging;
use advisor_rag::rerank::{Activation, CrossEncoder, HttpCrossEncoder};
use advisor_rag::retrieval::{RetrievalOrchestrator, RetrievalRequest, Services};
use advisor_rag::router::RoutingMethod;
use advisor_rag::search::{Bm25Params, SparseIndexSet};
use advisor_rag::server::AdvisorService;
use advisor_rag::student::StudentContext;
use advisor_rag::vector_store::qdrant::QdrantVectorStore;
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "advisor-rag", version, about = "Hybrid retrieval for academic advising questions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one retrieval and print the result as JSON
    Query {
        /// The question to answer
        query: String,
        /// Major program name or code
        #[arg(long)]
        program: Option<String>,
        /// Catalog year
        #[arg(long)]
        year: Option<String>,
        /// Declared minor name or code
        #[arg(long)]
        minor: Option<String>,
        /// Routing method override: keyword, semantic, llm, hybrid
        #[arg(long)]
        method: Option<RoutingMethod>,
        /// Number of chunks to return
        #[arg(long)]
        top_k: Option<usize>,
        /// Include the pipeline debug trace
        #[arg(long)]
        trace: bool,
    },
    /// BM25 index management
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Build (or extend) the BM25 index for a collection from a JSONL chunk export
    Build {
        /// Collection name, e.g. "major_catalogs"
        #[arg(long)]
        collection: String,
        /// JSONL file: one {"text": ..., "metadata": {...}} object per line
        #[arg(long)]
        input: PathBuf,
        /// Add to the existing index instead of replacing it
        #[arg(long)]
        append: bool,
    },
    /// Show persisted indexes and their document counts
    Stats,
}

/// Create the embedding provider based on configuration.
fn create_embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let timeout = Duration::from_millis(config.embedding.timeout_ms);
    match config.embedding.provider.as_str() {
        "openai" => {
            let api_key = config.embedding.openai_api_key.clone()
                .ok_or_else(|| anyhow::anyhow!(
                    "OpenAI API key required when embedding provider is 'openai'. \
                     Set ADVISOR_RAG_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in advisor-rag.toml"
                ))?;
            Ok(Arc::new(OpenAIEmbeddingProvider::new(
                config.embedding.openai_base_url.clone(),
                api_key,
                config.embedding.openai_model.clone(),
                timeout,
            )?))
        }
        "ollama" | _ => {
            Ok(Arc::new(OllamaEmbeddingProvider::new(
                config.embedding.ollama_base_url.clone(),
                config.embedding.ollama_model.clone(),
                timeout,
            )?))
        }
    }
}

/// Create the LLM provider used by LLM routing.
fn create_llm_provider(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    let timeout = Duration::from_millis(config.llm.timeout_ms);
    match config.llm.provider.as_str() {
        "openai" => {
            let api_key = config.llm.openai_api_key.clone()
                .ok_or_else(|| anyhow::anyhow!(
                    "OpenAI API key required when llm provider is 'openai'. \
                     Set ADVISOR_RAG_LLM__OPENAI_API_KEY or llm.openai_api_key in advisor-rag.toml"
                ))?;
            Ok(Arc::new(OpenAILlmProvider::new(
                config.llm.openai_base_url.clone(),
                api_key,
                config.llm.openai_model.clone(),
                timeout,
            )?))
        }
        "ollama" | _ => {
            Ok(Arc::new(OllamaLlmProvider::new(
                config.llm.ollama_base_url.clone(),
                config.llm.ollama_model.clone(),
                timeout,
            )?))
        }
    }
}

fn create_cross_encoder(config: &Config) -> Result<Option<Arc<dyn CrossEncoder>>> {
    if !config.reranker.enabled {
        tracing::info!("Cross-encoder disabled via config (reranker.enabled=false)");
        return Ok(None);
    }
    let encoder = HttpCrossEncoder::new(
        config.reranker.base_url.clone(),
        config.reranker.model.clone(),
        config.reranker.activation == Activation::Sigmoid,
        Duration::from_millis(config.reranker.timeout_ms),
    )?;
    Ok(Some(Arc::new(encoder)))
}

fn load_sparse_indexes(config: &Config) -> Result<Arc<SparseIndexSet>> {
    let set = SparseIndexSet::load_dir(Bm25Params::from(&config.bm25), &config.bm25.index_dir)
        .with_context(|| format!("Failed to load BM25 indexes from {}", config.bm25.index_dir))?;
    Ok(Arc::new(set))
}

fn build_orchestrator(config: &Config) -> Result<RetrievalOrchestrator> {
    let embedder = create_embedding_provider(config)?;
    let vector_store = Arc::new(QdrantVectorStore::new(
        config.vector_store.url.clone(),
        config.vector_store.api_key.clone(),
        Duration::from_millis(config.vector_store.timeout_ms),
    )?);
    let llm = match create_llm_provider(config) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to init llm provider, llm routing falls back to keywords");
            None
        }
    };
    let services = Services {
        embedder,
        vector_store,
        sparse: load_sparse_indexes(config)?,
        cross_encoder: create_cross_encoder(config)?,
        llm,
    };
    Ok(RetrievalOrchestrator::new(config, services))
}

/// Read a JSONL chunk export, skipping (and counting) malformed lines.
fn read_export(path: &Path, collection: &str) -> Result<(Vec<Chunk>, usize)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{pos}/{len}] {msg} [{elapsed_precise} / {eta_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(collection.to_string());

    let mut chunks = Vec::with_capacity(lines.len());
    let mut skipped = 0;
    for (n, line) in lines.iter().enumerate() {
        match ChunkRecord::parse_line(line) {
            Ok(Some(record)) => chunks.push(record.into_chunk(collection)),
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = n + 1, error = %e, "Skipping malformed export line");
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok((chunks, skipped))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // 3. Initialize logging FIRST (before any other output)
    // CRITICAL: logging goes to stderr only; stdout is reserved for JSON-RPC and query output
    logging::init_logging(&config);

    // 4. Handle subcommands
    match cli.command {
        Some(Commands::Query { query, program, year, minor, method, top_k, trace }) => {
            let orchestrator = build_orchestrator(&config)?;
            let request = RetrievalRequest {
                query,
                history: Vec::new(),
                student: StudentContext { program, catalog_year: year, minor },
                method,
                top_k,
            };
            let response = orchestrator.retrieve(request).await?;
            let mut output = serde_json::to_value(&response)?;
            if !trace {
                if let Some(obj) = output.as_object_mut() {
                    obj.remove("trace");
                }
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Some(Commands::Index { action }) => {
            let sparse = load_sparse_indexes(&config)?;
            match action {
                IndexAction::Build { collection, input, append } => {
                    let (chunks, skipped) = read_export(&input, &collection)?;
                    if chunks.is_empty() {
                        anyhow::bail!("No chunks found in {}", input.display());
                    }
                    let count = chunks.len();
                    let index = if append {
                        sparse.add_documents(&collection, chunks)?
                    } else {
                        sparse.rebuild(&collection, chunks)?
                    };
                    println!(
                        "Indexed {} chunks into '{}' ({} documents total, {} lines skipped).",
                        count,
                        collection,
                        index.len(),
                        skipped
                    );
                    println!("Index directory: {}", config.bm25.index_dir);
                }
                IndexAction::Stats => {
                    let stats: Vec<serde_json::Value> = sparse
                        .stats()
                        .into_iter()
                        .map(|(collection, documents)| {
                            serde_json::json!({ "collection": collection, "documents": documents })
                        })
                        .collect();
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "index_dir": config.bm25.index_dir,
                            "indexes": stats,
                        }))?
                    );
                }
            }
        }

        None => {
            // Default: start the MCP server
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                "advisor-rag server starting"
            );

            // 5. Wire external services into the retrieval pipeline
            let orchestrator = Arc::new(build_orchestrator(&config)?);
            tracing::info!(
                vector_store = %config.vector_store.url,
                embedding_provider = %config.embedding.provider,
                routing_method = %config.router.method,
                bm25_indexes = orchestrator.sparse().stats().len(),
                "Retrieval pipeline initialized"
            );

            // 6. Serve via stdio transport
            let service = AdvisorService::new(orchestrator);
            let (stdin, stdout) = rmcp::transport::io::stdio();
            let server = service.serve((stdin, stdout)).await?;

            tracing::info!("advisor-rag server running, awaiting tool calls via stdio");

            // 7. Wait for shutdown (client disconnects or signal)
            server.waiting().await?;

            tracing::info!("advisor-rag server stopped");
        }
    }

    Ok(())
}
