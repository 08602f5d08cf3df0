/// BM25 sparse index, one per collection.
///
/// Indexes are rebuilt wholesale when documents are added and persisted as
/// `<collection>.bm25.json` so a restart does not need the source export.
/// `SparseIndexSet` holds the live snapshots; a rebuild happens off-lock and the
/// finished index is swapped in, so searches already running keep the old one.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::tokenize::{is_course_code, tokenize};
use crate::chunk::Chunk;
use crate::config::Bm25Config;
use crate::errors::RetrievalError;

const INDEX_SUFFIX: &str = ".bm25.json";

/// Scoring parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    /// Multiplier on the contribution of query tokens that are course codes
    pub course_code_boost: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params {
            k1: 1.2,
            b: 0.75,
            course_code_boost: 2.0,
        }
    }
}

impl From<&Bm25Config> for Bm25Params {
    fn from(config: &Bm25Config) -> Self {
        Bm25Params {
            k1: config.k1,
            b: config.b,
            course_code_boost: config.course_code_boost,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BM25Index {
    collection: String,
    params: Bm25Params,
    documents: Vec<Chunk>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_len: Vec<usize>,
    idf: HashMap<String, f64>,
    avgdl: f64,
}

impl BM25Index {
    /// Build an index over `documents` (scores on the stored chunks are cleared).
    pub fn build(collection: impl Into<String>, documents: Vec<Chunk>, params: Bm25Params) -> Self {
        let documents: Vec<Chunk> = documents
            .into_iter()
            .map(|mut c| {
                c.score_dense = None;
                c.score_sparse = None;
                c.score_rrf = None;
                c.rerank_score = None;
                c.match_source = None;
                c
            })
            .collect();

        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_len = Vec::with_capacity(documents.len());
        let mut df: HashMap<String, usize> = HashMap::new();

        for doc in &documents {
            let tokens = tokenize(&doc.text);
            doc_len.push(tokens.len());
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_default() += 1;
            }
            for term in freqs.keys() {
                *df.entry(term.clone()).or_default() += 1;
            }
            term_freqs.push(freqs);
        }

        let n = documents.len() as f64;
        let idf = df
            .into_iter()
            .map(|(term, freq)| (term, (n / freq as f64).ln()))
            .collect();
        let avgdl = if documents.is_empty() {
            0.0
        } else {
            doc_len.iter().sum::<usize>() as f64 / n
        };

        BM25Index {
            collection: collection.into(),
            params,
            documents,
            term_freqs,
            doc_len,
            idf,
            avgdl,
        }
    }

    /// Rebuild with `more` appended after the existing documents.
    pub fn with_documents(&self, more: Vec<Chunk>) -> Self {
        let mut all = self.documents.clone();
        all.extend(more);
        BM25Index::build(self.collection.clone(), all, self.params)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn score(&self, doc: usize, query_tokens: &[(String, bool)]) -> f64 {
        let freqs = &self.term_freqs[doc];
        let dl = self.doc_len[doc] as f64;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };
        let Bm25Params { k1, b, course_code_boost } = self.params;

        query_tokens
            .iter()
            .filter_map(|(term, is_code)| {
                let tf = *freqs.get(term)? as f64;
                let idf = self.idf.get(term).copied().unwrap_or(0.0);
                let contribution = idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / avgdl));
                Some(if *is_code { contribution * course_code_boost } else { contribution })
            })
            .sum()
    }

    /// Top `top_k` documents with a positive score, best first.
    ///
    /// Ties keep insertion order. Returned chunks carry `score_sparse`.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<Chunk> {
        if self.documents.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let query_tokens: Vec<(String, bool)> = tokenize(query)
            .into_iter()
            .map(|t| {
                let is_code = is_course_code(&t);
                (t, is_code)
            })
            .collect();
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = (0..self.documents.len())
            .map(|i| (i, self.score(i, &query_tokens)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| {
                let mut chunk = self.documents[i].clone();
                chunk.score_sparse = Some(score);
                chunk
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<(), RetrievalError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let writer = BufWriter::new(fs::File::create(&tmp)?);
            serde_json::to_writer(writer, self)
                .map_err(|e| RetrievalError::Io(format!("serialize {}: {}", path.display(), e)))?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        let reader = BufReader::new(fs::File::open(path)?);
        serde_json::from_reader(reader)
            .map_err(|e| RetrievalError::Io(format!("parse {}: {}", path.display(), e)))
    }
}

/// Persisted index file for `collection` under `dir`.
pub fn index_path(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{}{}", collection, INDEX_SUFFIX))
}

/// Live per-collection sparse indexes.
pub struct SparseIndexSet {
    params: Bm25Params,
    dir: Option<PathBuf>,
    indexes: RwLock<HashMap<String, Arc<BM25Index>>>,
}

impl SparseIndexSet {
    /// Empty, in-memory only set.
    pub fn new(params: Bm25Params) -> Self {
        SparseIndexSet {
            params,
            dir: None,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Load every persisted index found in `dir`. A missing directory yields an empty set.
    pub fn load_dir(params: Bm25Params, dir: impl Into<PathBuf>) -> Result<Self, RetrievalError> {
        let dir = dir.into();
        let set = SparseIndexSet {
            params,
            dir: Some(dir.clone()),
            indexes: RwLock::new(HashMap::new()),
        };
        if !dir.exists() {
            tracing::info!(dir = %dir.display(), "BM25 index directory not found, starting empty");
            return Ok(set);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_index = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(INDEX_SUFFIX))
                .unwrap_or(false);
            if !is_index {
                continue;
            }
            match BM25Index::load(&path) {
                Ok(index) => {
                    tracing::info!(
                        collection = index.collection(),
                        documents = index.len(),
                        "Loaded BM25 index"
                    );
                    set.insert(index);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable BM25 index");
                }
            }
        }
        Ok(set)
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Swap in `index` for its collection.
    pub fn insert(&self, index: BM25Index) -> Arc<BM25Index> {
        let index = Arc::new(index);
        let mut guard = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(index.collection().to_string(), Arc::clone(&index));
        index
    }

    /// Current snapshot for `collection`.
    pub fn get(&self, collection: &str) -> Result<Arc<BM25Index>, RetrievalError> {
        let guard = self.indexes.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(collection)
            .cloned()
            .ok_or_else(|| RetrievalError::IndexNotBuilt {
                collection: collection.to_string(),
            })
    }

    /// Replace the index for `collection` with one built from `documents`, persisting it
    /// when the set is backed by a directory.
    pub fn rebuild(&self, collection: &str, documents: Vec<Chunk>) -> Result<Arc<BM25Index>, RetrievalError> {
        let index = BM25Index::build(collection, documents, self.params);
        self.persist(&index)?;
        Ok(self.insert(index))
    }

    /// Append `documents` to the collection's corpus and rebuild.
    pub fn add_documents(&self, collection: &str, documents: Vec<Chunk>) -> Result<Arc<BM25Index>, RetrievalError> {
        let index = match self.get(collection) {
            Ok(current) => current.with_documents(documents),
            Err(_) => BM25Index::build(collection, documents, self.params),
        };
        self.persist(&index)?;
        Ok(self.insert(index))
    }

    fn persist(&self, index: &BM25Index) -> Result<(), RetrievalError> {
        if let Some(ref dir) = self.dir {
            index.save(&index_path(dir, index.collection()))?;
        }
        Ok(())
    }

    pub fn search(&self, collection: &str, query: &str, top_k: usize) -> Result<Vec<Chunk>, RetrievalError> {
        Ok(self.get(collection)?.search(query, top_k))
    }

    /// (collection, document count) for every loaded index, sorted by name.
    pub fn stats(&self) -> Vec<(String, usize)> {
        let guard = self.indexes.read().unwrap_or_else(|e| e.into_inner());
        let mut stats: Vec<(String, usize)> = guard
            .iter()
            .map(|(name, index)| (name.clone(), index.len()))
            .collect();
        stats.sort();
        stats
    }
}
