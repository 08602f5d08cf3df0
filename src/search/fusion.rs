use std::collections::HashMap;

use crate::chunk::{Chunk, ChunkId, MatchSource};
use crate::config::FusionConfig;

/// Weighted Reciprocal Rank Fusion parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    /// Smoothing constant (60 by default; damps top-1 dominance)
    pub k: f64,
    pub dense_weight: f64,
    pub sparse_weight: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        FusionParams {
            k: 60.0,
            dense_weight: 0.6,
            sparse_weight: 0.4,
        }
    }
}

impl From<&FusionConfig> for FusionParams {
    fn from(config: &FusionConfig) -> Self {
        FusionParams {
            k: config.rrf_k,
            dense_weight: config.dense_weight,
            sparse_weight: config.sparse_weight,
        }
    }
}

const IN_DENSE: u8 = 1;
const IN_SPARSE: u8 = 2;

/// Fuse dense and sparse ranked lists via weighted Reciprocal Rank Fusion.
///
/// Each list contributes `weight / (k + rank + 1)` for a 0-based `rank`. Chunks are
/// keyed by `ChunkId`; a chunk repeated within one list counts at its best rank only.
/// Output is sorted by `score_rrf` descending, ties by first appearance (dense list
/// first). Fused chunks keep `score_dense`/`score_sparse` from whichever legs saw them.
pub fn reciprocal_rank_fusion(dense: Vec<Chunk>, sparse: Vec<Chunk>, params: &FusionParams) -> Vec<Chunk> {
    let mut slots: HashMap<ChunkId, usize> = HashMap::new();
    let mut fused: Vec<(Chunk, f64, u8)> = Vec::with_capacity(dense.len() + sparse.len());

    for (rank, chunk) in dense.into_iter().enumerate() {
        let contribution = params.dense_weight / (params.k + rank as f64 + 1.0);
        if slots.contains_key(&chunk.id) {
            continue;
        }
        slots.insert(chunk.id, fused.len());
        fused.push((chunk, contribution, IN_DENSE));
    }

    for (rank, chunk) in sparse.into_iter().enumerate() {
        let contribution = params.sparse_weight / (params.k + rank as f64 + 1.0);
        match slots.get(&chunk.id).copied() {
            Some(slot) => {
                let entry = &mut fused[slot];
                if entry.2 & IN_SPARSE != 0 {
                    continue;
                }
                entry.0.score_sparse = chunk.score_sparse;
                entry.1 += contribution;
                entry.2 |= IN_SPARSE;
            }
            None => {
                slots.insert(chunk.id, fused.len());
                fused.push((chunk, contribution, IN_SPARSE));
            }
        }
    }

    let mut result: Vec<Chunk> = fused
        .into_iter()
        .map(|(mut chunk, score, bits)| {
            chunk.score_rrf = Some(score);
            chunk.match_source = Some(match bits {
                b if b == IN_DENSE | IN_SPARSE => MatchSource::Hybrid,
                IN_SPARSE => MatchSource::SparseOnly,
                _ => MatchSource::DenseOnly,
            });
            chunk
        })
        .collect();

    // Stable sort keeps first-appearance order among equal scores
    result.sort_by(|a, b| {
        b.score_rrf
            .unwrap_or(0.0)
            .total_cmp(&a.score_rrf.unwrap_or(0.0))
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadata;

    fn chunk(text: &str) -> Chunk {
        Chunk::new(
            text,
            ChunkMetadata {
                collection: "major_catalogs".to_string(),
                ..Default::default()
            },
        )
    }

    fn dense(text: &str, score: f64) -> Chunk {
        let mut c = chunk(text);
        c.score_dense = Some(score);
        c
    }

    fn sparse(text: &str, score: f64) -> Chunk {
        let mut c = chunk(text);
        c.score_sparse = Some(score);
        c
    }

    #[test]
    fn test_top_in_both_lists_beats_top_in_one() {
        let fused = reciprocal_rank_fusion(
            vec![dense("a", 0.9), dense("b", 0.8)],
            vec![sparse("a", 5.0), sparse("c", 4.0)],
            &FusionParams::default(),
        );
        assert_eq!(fused[0].text, "a");
        assert_eq!(fused[0].match_source, Some(MatchSource::Hybrid));
        assert_eq!(fused[0].score_dense, Some(0.9));
        assert_eq!(fused[0].score_sparse, Some(5.0));
        let expected = 0.6 / 61.0 + 0.4 / 61.0;
        assert!((fused[0].score_rrf.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_single_list_chunks_get_one_term() {
        let fused = reciprocal_rank_fusion(
            vec![dense("a", 0.9)],
            vec![sparse("b", 1.0)],
            &FusionParams::default(),
        );
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].text, "a");
        assert_eq!(fused[0].match_source, Some(MatchSource::DenseOnly));
        assert_eq!(fused[0].score_sparse, None);
        assert_eq!(fused[1].match_source, Some(MatchSource::SparseOnly));
        assert!((fused[1].score_rrf.unwrap() - 0.4 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_larger_k_shrinks_rank_gap() {
        let gap = |k: f64| {
            let fused = reciprocal_rank_fusion(
                vec![dense("a", 0.9), dense("b", 0.8), dense("c", 0.7)],
                Vec::new(),
                &FusionParams { k, ..Default::default() },
            );
            fused[0].score_rrf.unwrap() - fused[2].score_rrf.unwrap()
        };
        assert!(gap(10.0) > gap(60.0));
        assert!(gap(60.0) > gap(600.0));
    }

    #[test]
    fn test_duplicate_within_a_list_counts_once() {
        let fused = reciprocal_rank_fusion(
            vec![dense("a", 0.9), dense("a", 0.5)],
            Vec::new(),
            &FusionParams::default(),
        );
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score_rrf.unwrap() - 0.6 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_equal_scores_keep_first_appearance() {
        let params = FusionParams {
            k: 60.0,
            dense_weight: 0.5,
            sparse_weight: 0.5,
        };
        let fused = reciprocal_rank_fusion(vec![dense("a", 0.9)], vec![sparse("b", 1.0)], &params);
        assert_eq!(fused[0].text, "a");
        assert_eq!(fused[1].text, "b");
    }

    #[test]
    fn test_empty_inputs() {
        assert!(reciprocal_rank_fusion(Vec::new(), Vec::new(), &FusionParams::default()).is_empty());
    }
}
