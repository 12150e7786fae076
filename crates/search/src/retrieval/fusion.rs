//! Reciprocal Rank Fusion (RRF) for combining search results
//!
//! RRF works on ranks only, so raw cosine and lexical scores never need
//! to be comparable. A candidate at rank `r` in a list contributes
//! `weight / (k + r)`.

use std::cmp::Ordering;
use std::collections::HashMap;

use secondbrain_common::models::ChunkHit;
use secondbrain_common::settings::RagSettings;
use uuid::Uuid;

use crate::types::HybridSearchResult;

/// RRF fusion parameters
#[derive(Debug, Clone)]
pub struct RRFusion {
    /// Constant k (typically 60)
    pub k: f32,

    /// Weight for vector results
    pub vector_weight: f32,

    /// Weight for lexical results
    pub bm25_weight: f32,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: 60.0,
            vector_weight: 0.7,
            bm25_weight: 0.3,
        }
    }
}

impl RRFusion {
    pub fn new(k: f32, vector_weight: f32, bm25_weight: f32) -> Self {
        Self {
            k,
            vector_weight,
            bm25_weight,
        }
    }

    pub fn from_settings(settings: &RagSettings) -> Self {
        Self::new(settings.rrf_k, settings.vector_weight, settings.bm25_weight)
    }

    /// Fuse rank-ordered vector and lexical lists, best first
    pub fn fuse(
        &self,
        vector_results: Vec<ChunkHit>,
        bm25_results: Vec<ChunkHit>,
        limit: usize,
    ) -> Vec<HybridSearchResult> {
        let max_bm25 = bm25_results
            .iter()
            .map(|h| h.score)
            .fold(0.0_f32, f32::max);

        let mut fused: HashMap<Uuid, HybridSearchResult> = HashMap::new();

        for (rank, hit) in vector_results.into_iter().enumerate() {
            let vector_score = hit.score;
            let contribution = self.vector_weight / (self.k + (rank + 1) as f32);
            let entry = fused
                .entry(hit.chunk_id)
                .or_insert_with(|| HybridSearchResult::from_hit(hit));
            entry.vector_score = vector_score;
            entry.rrf_score += contribution;
        }

        for (rank, hit) in bm25_results.into_iter().enumerate() {
            let normalized = if max_bm25 > 0.0 { hit.score / max_bm25 } else { 0.0 };
            let contribution = self.bm25_weight / (self.k + (rank + 1) as f32);
            let entry = fused
                .entry(hit.chunk_id)
                .or_insert_with(|| HybridSearchResult::from_hit(hit));
            entry.bm25_score = normalized;
            entry.rrf_score += contribution;
        }

        let mut results: Vec<HybridSearchResult> = fused.into_values().collect();
        sort_fused(&mut results);
        results.truncate(limit);
        results
    }

    /// Hybrid search disabled: order by cosine similarity alone
    pub fn vector_only(&self, vector_results: Vec<ChunkHit>, limit: usize) -> Vec<HybridSearchResult> {
        let mut results: Vec<HybridSearchResult> = vector_results
            .into_iter()
            .map(|hit| {
                let score = hit.score;
                let mut result = HybridSearchResult::from_hit(hit);
                result.vector_score = score;
                result.rrf_score = score;
                result
            })
            .collect();
        sort_fused(&mut results);
        results.truncate(limit);
        results
    }
}

/// Fused score desc, then vector score desc, then chunk id asc
pub fn compare_fused(a: &HybridSearchResult, b: &HybridSearchResult) -> Ordering {
    b.rrf_score
        .partial_cmp(&a.rrf_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.vector_score
                .partial_cmp(&a.vector_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_fused(results: &mut [HybridSearchResult]) {
    results.sort_by(compare_fused);
}

/// Merge candidate pools from several query representations; for a chunk
/// found more than once the copy with the highest fused score is kept.
pub fn merge_pools(pools: Vec<Vec<HybridSearchResult>>, limit: usize) -> Vec<HybridSearchResult> {
    let mut best: HashMap<Uuid, HybridSearchResult> = HashMap::new();
    for result in pools.into_iter().flatten() {
        match best.get(&result.id) {
            Some(existing) if compare_fused(existing, &result) != Ordering::Greater => {}
            _ => {
                best.insert(result.id, result);
            }
        }
    }
    let mut merged: Vec<HybridSearchResult> = best.into_values().collect();
    sort_fused(&mut merged);
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hit(id: u128, score: f32) -> ChunkHit {
        ChunkHit {
            chunk_id: Uuid::from_u128(id),
            note_id: Uuid::from_u128(id + 100),
            note_title: format!("Note {}", id),
            note_tags: vec![],
            content: "Test content".to_string(),
            chunk_index: 0,
            score,
            created_at: Utc::now(),
        }
    }

    fn score_of(results: &[HybridSearchResult], id: u128) -> f32 {
        results
            .iter()
            .find(|r| r.id == Uuid::from_u128(id))
            .map(|r| r.rrf_score)
            .unwrap_or_default()
    }

    #[test]
    fn test_rrf_fusion_scores() {
        let fusion = RRFusion::default();

        // Vector: [A, B], lexical: [B, C]
        let vector = vec![hit(1, 0.9), hit(2, 0.8)];
        let lexical = vec![hit(2, 4.0), hit(3, 2.0)];

        let results = fusion.fuse(vector, lexical, 10);
        let order: Vec<Uuid> = results.iter().map(|r| r.id).collect();
        assert_eq!(order, vec![Uuid::from_u128(2), Uuid::from_u128(1), Uuid::from_u128(3)]);

        assert!((score_of(&results, 1) - 0.7 / 61.0).abs() < 1e-6);
        assert!((score_of(&results, 2) - (0.7 / 62.0 + 0.3 / 61.0)).abs() < 1e-6);
        assert!((score_of(&results, 3) - 0.3 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let fusion = RRFusion::default();
        let vector = vec![hit(5, 0.5), hit(4, 0.5), hit(3, 0.4)];
        let lexical = vec![hit(6, 1.0), hit(7, 1.0)];

        let first = fusion.fuse(vector.clone(), lexical.clone(), 10);
        for _ in 0..10 {
            assert_eq!(fusion.fuse(vector.clone(), lexical.clone(), 10), first);
        }
    }

    #[test]
    fn test_presence_in_both_lists_wins() {
        let fusion = RRFusion::default();
        let vector = vec![hit(1, 0.9), hit(2, 0.8)];
        let lexical = vec![hit(1, 3.0)];

        let results = fusion.fuse(vector, lexical, 10);
        // rank 1 in both beats rank 1 in one list
        assert!(score_of(&results, 1) >= 0.7 / 61.0);
        assert_eq!(results[0].id, Uuid::from_u128(1));
    }

    #[test]
    fn test_bm25_scores_normalized() {
        let fusion = RRFusion::default();
        let results = fusion.fuse(vec![], vec![hit(1, 8.0), hit(2, 2.0)], 10);
        assert_eq!(results[0].bm25_score, 1.0);
        assert_eq!(results[1].bm25_score, 0.25);
        assert_eq!(results[0].vector_score, 0.0);
    }

    #[test]
    fn test_empty_lists_fuse_to_empty() {
        let fusion = RRFusion::default();
        assert!(fusion.fuse(vec![], vec![], 10).is_empty());
    }

    #[test]
    fn test_truncates_to_limit() {
        let fusion = RRFusion::default();
        let vector: Vec<ChunkHit> = (1..=30).map(|i| hit(i, 1.0 - i as f32 / 100.0)).collect();
        assert_eq!(fusion.fuse(vector, vec![], 20).len(), 20);
    }

    #[test]
    fn test_vector_only_orders_by_cosine() {
        let fusion = RRFusion::default();
        let results = fusion.vector_only(vec![hit(1, 0.4), hit(2, 0.9)], 10);
        assert_eq!(results[0].id, Uuid::from_u128(2));
        assert_eq!(results[0].rrf_score, 0.9);
    }

    #[test]
    fn test_merge_keeps_highest_fused_score() {
        let fusion = RRFusion::default();
        let first = fusion.fuse(vec![hit(1, 0.9), hit(2, 0.8)], vec![], 10);
        let second = fusion.fuse(vec![hit(2, 0.95)], vec![hit(2, 1.0)], 10);

        let merged = merge_pools(vec![first.clone(), second.clone()], 10);
        let reversed = merge_pools(vec![second, first], 10);
        assert_eq!(merged, reversed);

        let b = merged.iter().find(|r| r.id == Uuid::from_u128(2)).unwrap();
        assert!((b.rrf_score - (0.7 / 61.0 + 0.3 / 61.0)).abs() < 1e-6);
        assert_eq!(merged.len(), 2);
    }
}
