/// Domain-specific error types for advisor-rag
///
/// Every external collaborator (embedding service, vector store, cross-encoder, LLM)
/// has its own error enum next to its trait. They all convert into `RetrievalError`
/// so pipeline stages can record a single error kind in the debug trace before
/// degrading locally.

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Embedding failure: {0}")]
    EmbeddingFailure(String),

    #[error("Vector store failure: {0}")]
    VectorStoreFailure(String),

    #[error("Rerank failure: {0}")]
    RerankFailure(String),

    #[error("Routing failure: {0}")]
    RoutingFailure(String),

    #[error("BM25 index not built for collection '{collection}'")]
    IndexNotBuilt {
        collection: String
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RetrievalError {
    fn from(e: std::io::Error) -> Self {
        RetrievalError::Io(e.to_string())
    }
}

impl From<crate::embedding::EmbeddingError> for RetrievalError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        RetrievalError::EmbeddingFailure(e.to_string())
    }
}

impl From<crate::vector_store::VectorStoreError> for RetrievalError {
    fn from(e: crate::vector_store::VectorStoreError) -> Self {
        RetrievalError::VectorStoreFailure(e.to_string())
    }
}

impl From<crate::rerank::RerankError> for RetrievalError {
    fn from(e: crate::rerank::RerankError) -> Self {
        RetrievalError::RerankFailure(e.to_string())
    }
}

impl From<crate::llm::LlmError> for RetrievalError {
    fn from(e: crate::llm::LlmError) -> Self {
        RetrievalError::RoutingFailure(e.to_string())
    }
}

impl RetrievalError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use advisor_rag::errors::RetrievalError;
    /// let err = RetrievalError::validation("query", "Query cannot be empty");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        RetrievalError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    /// Short stable label for the error kind, used in trace events and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RetrievalError::EmbeddingFailure(_) => "embedding_failure",
            RetrievalError::VectorStoreFailure(_) => "vector_store_failure",
            RetrievalError::RerankFailure(_) => "rerank_failure",
            RetrievalError::RoutingFailure(_) => "routing_failure",
            RetrievalError::IndexNotBuilt { .. } => "index_not_built",
            RetrievalError::Validation { .. } => "validation",
            RetrievalError::Config(_) => "config",
            RetrievalError::Io(_) => "io",
        }
    }
}
