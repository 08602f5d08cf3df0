pub mod budget;
pub mod chunk;
pub mod collection;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod rerank;
pub mod retrieval;
pub mod retry;
pub mod router;
pub mod search;
pub mod server;
pub mod student;
pub mod trace;
pub mod vector_store;
