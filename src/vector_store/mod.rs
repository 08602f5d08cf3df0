/// Vector store abstraction layer
///
/// The vector index itself is an external collaborator; this module defines the
/// query-side trait, the equality filter model shared by the dense and sparse legs,
/// and the mapping from stored payloads into `Chunk`s.

pub mod qdrant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::chunk::{Chunk, ChunkMetadata};
use crate::retry::{Transient, is_transient_status};

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Vector store request failed: {0}")]
    Request(String),

    #[error("Vector store API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Vector store timeout: {0}")]
    Timeout(String),
}

impl Transient for VectorStoreError {
    fn is_transient(&self) -> bool {
        match self {
            VectorStoreError::Api { status, .. } => is_transient_status(*status),
            VectorStoreError::Timeout(_) => true,
            VectorStoreError::Request(_) | VectorStoreError::CollectionNotFound(_) => false,
        }
    }
}

/// Metadata dimensions the pipeline filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    /// Canonical subject/program code
    Program,
    /// Catalog year, exact string match
    CatalogYear,
    /// Canonical minor code
    Minor,
}

impl FilterField {
    /// Payload key used in the vector store.
    pub fn payload_key(self) -> &'static str {
        match self {
            FilterField::Program => "program",
            FilterField::CatalogYear => "year",
            FilterField::Minor => "minor",
        }
    }

    /// Stored spellings a filter value matches. Codes are stored either lowercase or
    /// uppercase; years must match verbatim.
    pub fn accepted_values(self, value: &str) -> Vec<String> {
        match self {
            FilterField::CatalogYear => vec![value.to_string()],
            FilterField::Program | FilterField::Minor => {
                let lower = value.to_lowercase();
                let upper = value.to_uppercase();
                if lower == upper {
                    vec![lower]
                } else {
                    vec![lower, upper]
                }
            }
        }
    }

    fn metadata_value(self, meta: &ChunkMetadata) -> Option<&str> {
        match self {
            FilterField::Program => meta.subject_code.as_deref(),
            FilterField::CatalogYear => meta.catalog_year.as_deref(),
            FilterField::Minor => meta.minor_code.as_deref(),
        }
    }
}

/// Conjunction of equality conditions. Empty means unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    conditions: Vec<(FilterField, String)>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a condition. Codes are lowercased; years are kept verbatim.
    pub fn with(mut self, field: FilterField, value: impl Into<String>) -> Self {
        let value = value.into();
        let value = match field {
            FilterField::CatalogYear => value.trim().to_string(),
            FilterField::Program | FilterField::Minor => value.trim().to_lowercase(),
        };
        self.conditions.retain(|(f, _)| *f != field);
        self.conditions.push((field, value));
        self
    }

    /// Add a condition only when a value is present.
    pub fn with_opt(self, field: FilterField, value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.trim().is_empty() => self.with(field, v),
            _ => self,
        }
    }

    pub fn without(&self, field: FilterField) -> Self {
        SearchFilter {
            conditions: self
                .conditions
                .iter()
                .filter(|(f, _)| *f != field)
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(FilterField, String)] {
        &self.conditions
    }

    pub fn value(&self, field: FilterField) -> Option<&str> {
        self.conditions
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }

    /// Evaluate the filter against chunk metadata (used by the sparse leg).
    ///
    /// Accepts the same spellings the vector store query does, see
    /// `FilterField::accepted_values`.
    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            match field.metadata_value(meta) {
                Some(actual) => field
                    .accepted_values(expected)
                    .iter()
                    .any(|v| v == actual.trim()),
                None => false,
            }
        })
    }

    /// Human-readable form for traces, e.g. `program=cs,year=2024`.
    pub fn describe(&self) -> String {
        if self.conditions.is_empty() {
            return "none".to_string();
        }
        self.conditions
            .iter()
            .map(|(f, v)| format!("{}={}", f.payload_key(), v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A single nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub payload: Map<String, Value>,
}

/// Query side of the external vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Filtered nearest-neighbor query scoped to one collection, best first.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError>;
}

const TEXT_KEYS: &[&str] = &["chunk_text", "text", "content"];
const PROGRAM_KEYS: &[&str] = &["program", "subject_code", "Subject", "subject"];
const YEAR_KEYS: &[&str] = &["year", "catalog_year", "Year"];
const MINOR_KEYS: &[&str] = &["minor", "minor_code"];
const SOURCE_KEYS: &[&str] = &["file_name", "source_file", "resourceName", "source"];
const SECTION_KEYS: &[&str] = &["section", "section_name"];

fn take_string(payload: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = payload.remove(*key) {
            let s = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            if !s.trim().is_empty() {
                return Some(s);
            }
        }
    }
    None
}

/// Map a stored payload into a `Chunk` for `collection`.
///
/// Accepts flat payloads and payloads that nest provenance under `metadata`.
/// Returns `None` when the payload carries no text.
pub fn payload_to_chunk(collection: &str, mut payload: Map<String, Value>) -> Option<Chunk> {
    if let Some(Value::Object(nested)) = payload.remove("metadata") {
        for (k, v) in nested {
            payload.entry(k).or_insert(v);
        }
    }
    let text = take_string(&mut payload, TEXT_KEYS)?;
    payload.remove("collection");
    let metadata = ChunkMetadata {
        collection: collection.to_string(),
        subject_code: take_string(&mut payload, PROGRAM_KEYS).map(|s| s.to_lowercase()),
        catalog_year: take_string(&mut payload, YEAR_KEYS),
        minor_code: take_string(&mut payload, MINOR_KEYS).map(|s| s.to_lowercase()),
        source_file: take_string(&mut payload, SOURCE_KEYS),
        section: take_string(&mut payload, SECTION_KEYS),
        extra: payload.into_iter().collect(),
    };
    Some(Chunk::new(text, metadata))
}
