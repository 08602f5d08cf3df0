pub mod bm25;
pub mod fusion;
pub mod tokenize;

// Re-export key types for convenience
pub use bm25::{BM25Index, Bm25Params, SparseIndexSet};
pub use fusion::{FusionParams, reciprocal_rank_fusion};
pub use tokenize::{extract_course_codes, is_course_code, tokenize};
