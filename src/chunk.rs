/// Chunk data model shared by every pipeline stage.
///
/// Chunks are produced upstream by ingestion and consumed read-only here, except for
/// the score fields, which stay `None` until the stage that computes them has run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for chunk identity UUIDs (UUIDv5 over normalized text and provenance).
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a9e_8d3b_4c57_9e41_0b7a_52d6_c183);

/// Canonical chunk identity used for every dedup and fusion operation.
///
/// Derived from whitespace-normalized lowercase text plus collection and source file,
/// so the same passage retrieved by the dense and sparse legs collapses to one key
/// while distinct chunks sharing a text prefix never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(Uuid);

impl ChunkId {
    pub fn derive(text: &str, collection: &str, source_file: Option<&str>) -> Self {
        let normalized = normalize_text(text);
        let mut name = String::with_capacity(normalized.len() + collection.len() + 32);
        name.push_str(collection);
        name.push('\u{1f}');
        name.push_str(source_file.unwrap_or(""));
        name.push('\u{1f}');
        name.push_str(&normalized);
        ChunkId(Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes()))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Provenance metadata attached to a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Collection the chunk belongs to
    #[serde(default)]
    pub collection: String,
    /// Canonical subject/program code (e.g. "cs")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_code: Option<String>,
    /// Catalog year as an exact string (e.g. "2024")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Any payload keys not mapped above
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Which retrieval legs a fused chunk appeared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Hybrid,
    DenseOnly,
    SparseOnly,
}

/// A retrievable unit of text with provenance and per-stage scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_dense: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_sparse: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_rrf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_source: Option<MatchSource>,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        let text = text.into();
        let id = ChunkId::derive(&text, &metadata.collection, metadata.source_file.as_deref());
        Chunk {
            id,
            text,
            metadata,
            score_dense: None,
            score_sparse: None,
            score_rrf: None,
            rerank_score: None,
            match_source: None,
        }
    }

    pub fn collection(&self) -> &str {
        &self.metadata.collection
    }

    /// Most downstream score available: rerank, then RRF, then dense, then sparse.
    pub fn best_score(&self) -> f64 {
        self.rerank_score
            .or(self.score_rrf)
            .or(self.score_dense)
            .or(self.score_sparse)
            .unwrap_or(0.0)
    }

    /// Retrieval-stage score (pre-rerank) used for the output contract's `score` field.
    pub fn retrieval_score(&self) -> f64 {
        self.score_rrf
            .or(self.score_dense)
            .or(self.score_sparse)
            .unwrap_or(0.0)
    }
}

/// Ingestion export record: one JSON object per line in a chunk export file.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    /// Parse one line of an export file. Blank lines yield `None`.
    pub fn parse_line(line: &str) -> Result<Option<ChunkRecord>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }

    /// Chunk for `collection`, whatever collection the record was exported under.
    pub fn into_chunk(mut self, collection: &str) -> Chunk {
        self.metadata.collection = collection.to_string();
        Chunk::from(self)
    }
}

impl From<ChunkRecord> for Chunk {
    fn from(record: ChunkRecord) -> Self {
        Chunk::new(record.text, record.metadata)
    }
}

/// Output contract handed to the answer-generation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub collection: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

impl From<Chunk> for RetrievedChunk {
    fn from(chunk: Chunk) -> Self {
        let score = chunk.retrieval_score();
        RetrievedChunk {
            id: chunk.id,
            collection: chunk.metadata.collection.clone(),
            rerank_score: chunk.rerank_score,
            text: chunk.text,
            metadata: chunk.metadata,
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(collection: &str, source: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            collection: collection.to_string(),
            source_file: source.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_chunk_id_ignores_case_and_whitespace() {
        let a = Chunk::new("CPSC 350  Data Structures", meta("major_catalogs", Some("cs.pdf")));
        let b = Chunk::new("cpsc 350 data\nstructures", meta("major_catalogs", Some("cs.pdf")));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_chunk_id_distinguishes_shared_prefix() {
        let prefix = "Students must complete the following requirements before graduation: ";
        let a = Chunk::new(format!("{prefix}CPSC 350"), meta("major_catalogs", None));
        let b = Chunk::new(format!("{prefix}MATH 210"), meta("major_catalogs", None));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_chunk_id_includes_provenance() {
        let a = Chunk::new("same text", meta("major_catalogs", Some("a.pdf")));
        let b = Chunk::new("same text", meta("major_catalogs", Some("b.pdf")));
        let c = Chunk::new("same text", meta("minor_catalogs", Some("a.pdf")));
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_scores_absent_until_computed() {
        let chunk = Chunk::new("text", meta("general_knowledge", None));
        assert!(chunk.score_dense.is_none());
        assert!(chunk.score_sparse.is_none());
        assert!(chunk.score_rrf.is_none());
        assert!(chunk.rerank_score.is_none());
        assert_eq!(chunk.best_score(), 0.0);
    }

    #[test]
    fn test_record_metadata_extra_keys_are_kept() {
        let record: ChunkRecord = serde_json::from_str(
            r#"{"text": "t", "metadata": {"collection": "major_catalogs", "catalog_year": "2024", "page": 3}}"#,
        )
        .unwrap();
        let chunk = Chunk::from(record);
        assert_eq!(chunk.metadata.catalog_year.as_deref(), Some("2024"));
        assert_eq!(chunk.metadata.extra.get("page"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_export_line_parsing() {
        assert!(ChunkRecord::parse_line("   ").unwrap().is_none());
        assert!(ChunkRecord::parse_line("{not json").is_err());

        let record = ChunkRecord::parse_line(r#"{"text": "MATH 110", "metadata": {"collection": "old"}}"#)
            .unwrap()
            .unwrap();
        let chunk = record.into_chunk("course_listings");
        assert_eq!(chunk.collection(), "course_listings");
        assert_eq!(chunk.id, Chunk::new("MATH 110", meta("course_listings", None)).id);
    }
}
