use rmcp::{
    ServerHandler,
    tool,
    model::{
        ServerCapabilities, Implementation, ProtocolVersion, CallToolResult,
        RawResource, ListResourcesResult, ReadResourceResult, ResourceContents,
        ReadResourceRequestParams, AnnotateAble,
    },
    handler::server::wrapper::Parameters,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::RetrievalError;
use crate::retrieval::{RetrievalOrchestrator, RetrievalRequest};
use crate::router::{ConversationTurn, RoutingMethod};
use crate::student::StudentContext;
use crate::trace::DebugTrace;

const CATALOG_URI: &str = "collections://catalog";
const MAX_SPARSE_LIMIT: u32 = 100;

pub struct AdvisorService {
    orchestrator: Arc<RetrievalOrchestrator>,
    start_time: Instant,
}

impl AdvisorService {
    pub fn new(orchestrator: Arc<RetrievalOrchestrator>) -> Self {
        Self {
            orchestrator,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn catalog(&self) -> serde_json::Value {
        let sizes = self.orchestrator.sparse().stats();
        let collections: Vec<serde_json::Value> = self
            .orchestrator
            .collections()
            .entries()
            .into_iter()
            .map(|(kind, name)| {
                let documents = sizes.iter().find(|(n, _)| *n == name).map(|(_, len)| *len);
                json!({
                    "name": name,
                    "kind": kind,
                    "description": kind.description(),
                    "bm25_documents": documents,
                })
            })
            .collect();
        json!({ "collections": collections })
    }
}

// Parameter structs

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct SearchAcademicParams {
    /// The student's question (required)
    pub query: String,
    /// Recent conversation turns, oldest first (optional)
    pub history: Option<Vec<ConversationTurn>>,
    /// Major program name or code, e.g. "Computer Science" or "cs" (optional)
    pub program: Option<String>,
    /// Catalog year, e.g. "2024" (optional)
    pub catalog_year: Option<String>,
    /// Declared minor name or code (optional)
    pub minor: Option<String>,
    /// Routing method: "keyword", "semantic", "llm" or "hybrid" (default: configured)
    pub method: Option<String>,
    /// Number of chunks to return (default: reranker.top_k)
    pub top_k: Option<u32>,
    /// Include the pipeline debug trace in the response (default: false)
    #[serde(default)]
    pub include_trace: bool,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct RouteQueryParams {
    /// The student's question (required)
    pub query: String,
    /// Recent conversation turns, oldest first (optional)
    pub history: Option<Vec<ConversationTurn>>,
    pub program: Option<String>,
    pub catalog_year: Option<String>,
    pub minor: Option<String>,
    /// Routing method: "keyword", "semantic", "llm" or "hybrid" (default: configured)
    pub method: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SparseSearchParams {
    /// Collection to search, e.g. "major_catalogs" (required)
    pub collection: String,
    /// Keyword query (required)
    pub query: String,
    /// Maximum results to return (1-100, default: 10)
    pub limit: Option<u32>,
}

// Helper: convert RetrievalError to CallToolResult with isError: true
fn retrieval_error_to_result(err: RetrievalError) -> CallToolResult {
    match err {
        RetrievalError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        RetrievalError::IndexNotBuilt { collection } => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("No BM25 index loaded for collection '{}'", collection),
                "hint": "Build one with `advisor-rag index build` and restart the server"
            }))
        }
        other => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": other.to_string(),
                "kind": other.kind()
            }))
        }
    }
}

fn empty_query_error() -> CallToolResult {
    CallToolResult::structured_error(json!({
        "isError": true,
        "error": "Field 'query' is required and cannot be empty",
        "field": "query"
    }))
}

fn parse_method(method: Option<&str>) -> Result<Option<RoutingMethod>, CallToolResult> {
    method
        .map(str::parse::<RoutingMethod>)
        .transpose()
        .map_err(|e| {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": e,
                "field": "method"
            }))
        })
}

fn student_from(program: Option<String>, catalog_year: Option<String>, minor: Option<String>) -> StudentContext {
    StudentContext {
        program,
        catalog_year,
        minor,
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::internal_error(e.to_string(), None))
}

impl SearchAcademicParams {
    fn into_request(self) -> Result<RetrievalRequest, CallToolResult> {
        if self.query.trim().is_empty() {
            return Err(empty_query_error());
        }
        if self.top_k == Some(0) {
            return Err(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "top_k must be at least 1",
                "field": "top_k"
            })));
        }
        Ok(RetrievalRequest {
            method: parse_method(self.method.as_deref())?,
            query: self.query,
            history: self.history.unwrap_or_default(),
            student: student_from(self.program, self.catalog_year, self.minor),
            top_k: self.top_k.map(|k| k as usize),
        })
    }
}

// Tool implementations
#[rmcp::tool_router]
impl AdvisorService {
    #[tool(description = "Answer-ready retrieval for an academic advising question: routes to the relevant collections, runs hybrid BM25 + vector search with budgeted per-collection quotas, and reranks. Returns ranked passages with provenance.")]
    async fn search_academic(
        &self,
        Parameters(params): Parameters<SearchAcademicParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "search_academic",
            program = ?params.program,
            method = ?params.method,
            "Tool called"
        );

        let include_trace = params.include_trace;
        let request = match params.into_request() {
            Ok(request) => request,
            Err(result) => return Ok(result),
        };

        match self.orchestrator.retrieve(request).await {
            Ok(response) => {
                let mut obj = json!({
                    "request_id": response.request_id,
                    "outcome": response.outcome,
                    "query": response.routing.query,
                    "routing_method": response.routing.method,
                    "collections": response.routing.collections,
                    "budget": to_json(&response.budget)?,
                    "chunks": to_json(&response.chunks)?,
                });
                if include_trace {
                    obj["trace"] = to_json(&response.trace)?;
                }
                Ok(CallToolResult::structured(obj))
            }
            Err(e) => {
                tracing::warn!(tool = "search_academic", error = %e, "Retrieval failed");
                Ok(retrieval_error_to_result(e))
            }
        }
    }

    #[tool(description = "Show which collections a question would be routed to, and the query text after conversation-context enrichment, without searching.")]
    async fn route_query(
        &self,
        Parameters(params): Parameters<RouteQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "route_query", method = ?params.method, "Tool called");

        if params.query.trim().is_empty() {
            return Ok(empty_query_error());
        }
        let method = match parse_method(params.method.as_deref()) {
            Ok(method) => method,
            Err(result) => return Ok(result),
        };
        let router = self.orchestrator.router();
        let student = student_from(params.program, params.catalog_year, params.minor);
        let history = params.history.unwrap_or_default();
        let mut trace = DebugTrace::new();

        let decision = router
            .route_with(
                method.unwrap_or_else(|| router.method()),
                &params.query,
                &history,
                &student,
                &mut trace,
            )
            .await;

        Ok(CallToolResult::structured(json!({
            "collections": decision.collections,
            "query": decision.query,
            "method": decision.method,
            "trace": to_json(&trace)?,
        })))
    }

    #[tool(description = "Keyword-only BM25 search over one collection. Useful for exact course codes such as 'CPSC 350'.")]
    async fn sparse_search(
        &self,
        Parameters(params): Parameters<SparseSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "sparse_search",
            collection = %params.collection,
            limit = ?params.limit,
            "Tool called"
        );

        if params.query.trim().is_empty() {
            return Ok(empty_query_error());
        }
        let limit = params.limit.unwrap_or(10);
        if limit == 0 || limit > MAX_SPARSE_LIMIT {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("limit must be between 1 and {}", MAX_SPARSE_LIMIT),
                "field": "limit"
            })));
        }

        match self
            .orchestrator
            .sparse()
            .search(&params.collection, &params.query, limit as usize)
        {
            Ok(chunks) => {
                let results: Vec<serde_json::Value> = chunks
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "text": c.text,
                            "metadata": c.metadata,
                            "score": c.score_sparse,
                        })
                    })
                    .collect();
                Ok(CallToolResult::structured(json!({
                    "collection": params.collection,
                    "count": results.len(),
                    "results": results,
                })))
            }
            Err(e) => Ok(retrieval_error_to_result(e)),
        }
    }

    #[tool(description = "Check server health and status")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        let indexes: Vec<serde_json::Value> = self
            .orchestrator
            .sparse()
            .stats()
            .into_iter()
            .map(|(collection, documents)| json!({ "collection": collection, "documents": documents }))
            .collect();

        let response = json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.uptime_seconds(),
            "routing_method": self.orchestrator.router().method(),
            "bm25_indexes": indexes,
        });

        Ok(CallToolResult::structured(response))
    }
}

// ServerHandler implementation
#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for AdvisorService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "advisor-rag".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Hybrid retrieval for academic advising questions".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Academic advising retrieval server. Tools: search_academic, route_query, sparse_search, health_check. Resources: collections://catalog (configured collections and BM25 index sizes).".to_string()
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            meta: None,
            resources: vec![
                RawResource {
                    uri: CATALOG_URI.to_string(),
                    name: "catalog".to_string(),
                    title: Some("Collection Catalog".to_string()),
                    description: Some("Configured collections, what they hold, and BM25 index sizes".to_string()),
                    mime_type: Some("application/json".to_string()),
                    size: None,
                    icons: None,
                    meta: None,
                }
                .no_annotation(),
            ],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        match request.uri.as_str() {
            CATALOG_URI => {
                let text = serde_json::to_string_pretty(&self.catalog())
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?;
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(text, request.uri)],
                })
            }
            uri => Err(McpError::resource_not_found(
                format!("Resource not found: {}", uri),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_map_to_request() {
        let params = SearchAcademicParams {
            query: "What are the CS major requirements?".to_string(),
            program: Some("cs".to_string()),
            catalog_year: Some("2024".to_string()),
            method: Some("Keyword".to_string()),
            top_k: Some(5),
            ..Default::default()
        };
        let request = params.into_request().unwrap();
        assert_eq!(request.method, Some(RoutingMethod::Keyword));
        assert_eq!(request.top_k, Some(5));
        assert_eq!(request.student.program.as_deref(), Some("cs"));
        assert!(request.history.is_empty());
    }

    #[test]
    fn test_params_reject_bad_input() {
        let empty = SearchAcademicParams {
            query: "  ".to_string(),
            ..Default::default()
        };
        assert!(empty.into_request().is_err());

        let bad_method = SearchAcademicParams {
            query: "minor requirements".to_string(),
            method: Some("psychic".to_string()),
            ..Default::default()
        };
        assert!(bad_method.into_request().is_err());
    }
}
