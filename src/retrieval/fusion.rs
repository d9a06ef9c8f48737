//! Reciprocal Rank Fusion for combining keyword and semantic hits

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Configuration for fusion algorithm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Weight for semantic results
    pub semantic_weight: f32,

    /// Weight for keyword results
    pub keyword_weight: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            semantic_weight: 1.0,
            keyword_weight: 1.0,
        }
    }
}

/// Apply Reciprocal Rank Fusion to combine two ranked lists
///
/// `score(key) = Σ weight / (rrf_k + rank)` over the lists containing `key`,
/// with 1-based ranks. A key found by one search keeps that list's share only.
///
/// Inputs are `(key, original_score)` pairs, best first. Output is sorted by
/// fused score descending; equal scores keep insertion order (lower key first).
pub fn reciprocal_rank_fusion(
    keyword_results: &[(u64, f32)],
    semantic_results: &[(u64, f32)],
    config: &FusionConfig,
) -> Vec<(u64, f32)> {
    let mut scores: AHashMap<u64, f32> = AHashMap::new();

    let lists = [
        (keyword_results, config.keyword_weight),
        (semantic_results, config.semantic_weight),
    ];

    for (results, weight) in lists {
        for (rank, (key, _original_score)) in results.iter().enumerate() {
            let rrf_score = weight / (config.rrf_k + (rank as f32) + 1.0);
            *scores.entry(*key).or_insert(0.0) += rrf_score;
        }
    }

    let mut fused: Vec<(u64, f32)> = scores.into_iter().collect();
    sort_by_score(&mut fused);
    fused
}

/// Sort `(key, score)` pairs best first, breaking ties by key
pub fn sort_by_score(results: &mut [(u64, f32)]) {
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrf_basic() {
        let keyword = vec![(2, 9.5), (1, 8.5), (4, 7.5)];
        let semantic = vec![(1, 0.9), (2, 0.8), (3, 0.7)];

        let fused = reciprocal_rank_fusion(&keyword, &semantic, &FusionConfig::default());
        assert_eq!(fused.len(), 4);

        // 1 and 2 appear in both lists and tie; the lower key wins
        assert_eq!(fused[0].0, 1);
        assert_eq!(fused[1].0, 2);
        assert!((fused[0].1 - fused[1].1).abs() < f32::EPSILON);

        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].1 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_single_list_keeps_its_share() {
        let fused = reciprocal_rank_fusion(&[(7, 3.0)], &[], &FusionConfig::default());
        assert_eq!(fused, vec![(7, 1.0 / 61.0)]);
    }

    #[test]
    fn test_rrf_weighted() {
        let config = FusionConfig {
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            ..FusionConfig::default()
        };
        let fused = reciprocal_rank_fusion(&[(2, 0.9)], &[(1, 0.9)], &config);
        assert_eq!(fused[0].0, 1);
    }

    #[test]
    fn test_sort_by_score_tie_break() {
        let mut results = vec![(9, 1.0), (3, 2.0), (4, 1.0)];
        sort_by_score(&mut results);
        assert_eq!(results, vec![(3, 2.0), (4, 1.0), (9, 1.0)]);
    }
}
