//! Reciprocal Rank Fusion algorithm for combining branch results

use super::{BranchHit, BranchKind, ChunkId, MergedResult};
use ahash::{AHashMap, AHashSet};
use std::cmp::Ordering;
use thiserror::Error;

/// Conventional RRF constant
pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be positive and finite")]
    InvalidWeights,

    #[error("Invalid RRF constant {0}: must be non-negative and finite")]
    InvalidK(f64),
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f64,

    /// Weight for vector results
    pub vector_weight: f64,

    /// Weight for full-text results
    pub fulltext_weight: f64,

    /// Weight for tag results
    pub tag_weight: f64,
}

impl FusionConfig {
    pub fn new(
        rrf_k: f64,
        vector_weight: f64,
        fulltext_weight: f64,
        tag_weight: f64,
    ) -> Result<Self, FusionError> {
        if !rrf_k.is_finite() || rrf_k < 0.0 {
            return Err(FusionError::InvalidK(rrf_k));
        }
        let weights = [vector_weight, fulltext_weight, tag_weight];
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(FusionError::InvalidWeights);
        }

        Ok(Self {
            rrf_k,
            vector_weight,
            fulltext_weight,
            tag_weight,
        })
    }

    pub fn weight(&self, branch: BranchKind) -> f64 {
        match branch {
            BranchKind::Vector => self.vector_weight,
            BranchKind::FullText => self.fulltext_weight,
            BranchKind::Tags => self.tag_weight,
        }
    }

    /// Contribution of a 1-based `rank` in `branch`
    pub fn contribution(&self, branch: BranchKind, rank: usize) -> f64 {
        self.weight(branch) / (self.rrf_k + rank as f64)
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            vector_weight: 1.0,
            fulltext_weight: 1.0,
            tag_weight: 1.0,
        }
    }
}

/// Order hits by native score descending, ties by ascending id
///
/// Duplicate ids keep their best-ranked occurrence.
pub fn rank_branch(mut hits: Vec<BranchHit>) -> Vec<BranchHit> {
    hits.sort_by(|a, b| {
        b.score
            .value()
            .partial_cmp(&a.score.value())
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });

    let mut seen: AHashSet<ChunkId> = AHashSet::with_capacity(hits.len());
    hits.retain(|hit| seen.insert(hit.id));
    hits
}

/// Apply Reciprocal Rank Fusion to the branch lists
///
/// RRF formula: score(id) = sum over branches of weight / (k + rank), with
/// 1-based ranks. Every per-branch rank and score is carried into the merged
/// result. Output is sorted by fused score descending, ties by ascending id.
pub fn reciprocal_rank_fusion(
    branches: Vec<(BranchKind, Vec<BranchHit>)>,
    config: &FusionConfig,
) -> Vec<MergedResult> {
    let mut merged: AHashMap<ChunkId, MergedResult> = AHashMap::new();

    for (branch, hits) in branches {
        for (position, hit) in rank_branch(hits).into_iter().enumerate() {
            let rank = position + 1;
            let entry = merged
                .entry(hit.id)
                .or_insert_with(|| MergedResult::new(hit.id, hit.content.clone()));

            entry.rrf_score += config.contribution(branch, rank);
            entry.set_rank(branch, rank);
            entry.absorb_score(&hit.score);
        }
    }

    let mut results: Vec<MergedResult> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });

    results
}
