/// Qdrant vector store client (REST API)
///
/// Issues filtered nearest-neighbor searches against
/// `POST /collections/{name}/points/search`. Upserts and collection management
/// belong to ingestion and are not implemented here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{SearchFilter, VectorHit, VectorStore, VectorStoreError};

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    with_vector: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<QdrantFilter>,
}

#[derive(Serialize, Debug, PartialEq)]
struct QdrantFilter {
    must: Vec<FieldCondition>,
}

#[derive(Serialize, Debug, PartialEq)]
struct FieldCondition {
    key: String,
    #[serde(rename = "match")]
    matches: MatchValue,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
enum MatchValue {
    Value { value: String },
    Any { any: Vec<String> },
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f64,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

fn to_qdrant_filter(filter: &SearchFilter) -> Option<QdrantFilter> {
    if filter.is_empty() {
        return None;
    }
    Some(QdrantFilter {
        must: filter
            .conditions()
            .iter()
            .map(|(field, value)| {
                let mut accepted = field.accepted_values(value);
                let matches = if accepted.len() == 1 {
                    MatchValue::Value { value: accepted.remove(0) }
                } else {
                    MatchValue::Any { any: accepted }
                };
                FieldCondition {
                    key: field.payload_key().to_string(),
                    matches,
                }
            })
            .collect(),
    })
}

pub struct QdrantVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantVectorStore {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, VectorStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VectorStoreError::Request(format!("HTTP client: {}", e)))?;
        Ok(QdrantVectorStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let request = SearchRequest {
            vector,
            limit,
            with_payload: true,
            with_vector: false,
            filter: to_qdrant_filter(filter),
        };

        let mut builder = self
            .client
            .post(format!("{}/collections/{}/points/search", self.base_url, collection))
            .json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                VectorStoreError::Timeout(e.to_string())
            } else if e.is_connect() {
                VectorStoreError::Api { status: 503, message: format!("connection failed: {}", e) }
            } else {
                VectorStoreError::Request(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(VectorStoreError::CollectionNotFound(collection.to_string()));
        }
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(VectorStoreError::Api { status, message: body });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| VectorStoreError::Request(format!("Failed to parse Qdrant response: {}", e)))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|p| VectorHit {
                id: match p.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }
}
