//! Per-branch hits and fused results

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Primary key of a stored chunk; the join key across branches
pub type ChunkId = i64;

/// One of the three retrieval branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "fulltext")]
    FullText,
    #[serde(rename = "tags")]
    Tags,
}

impl BranchKind {
    pub const ALL: [BranchKind; 3] = [BranchKind::Vector, BranchKind::FullText, BranchKind::Tags];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::FullText => "fulltext",
            Self::Tags => "tags",
        }
    }
}

impl std::fmt::Display for BranchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native score reported by a branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchScore {
    /// Cosine similarity in `[0, 1]`
    Vector { similarity: f32 },
    /// Fraction of query terms present in the chunk
    FullText { text_rank: f32 },
    /// Number of query tags on the chunk's document
    Tag {
        tag_score: u32,
        matched_tags: Vec<String>,
    },
}

impl BranchScore {
    pub fn kind(&self) -> BranchKind {
        match self {
            Self::Vector { .. } => BranchKind::Vector,
            Self::FullText { .. } => BranchKind::FullText,
            Self::Tag { .. } => BranchKind::Tags,
        }
    }

    /// Score used to order hits within a branch
    pub fn value(&self) -> f64 {
        match self {
            Self::Vector { similarity } => f64::from(*similarity),
            Self::FullText { text_rank } => f64::from(*text_rank),
            Self::Tag { tag_score, .. } => f64::from(*tag_score),
        }
    }
}

/// A single branch result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchHit {
    pub id: ChunkId,
    pub content: String,
    pub score: BranchScore,
}

impl BranchHit {
    pub fn vector(id: ChunkId, content: impl Into<String>, similarity: f32) -> Self {
        Self {
            id,
            content: content.into(),
            score: BranchScore::Vector { similarity },
        }
    }

    pub fn fulltext(id: ChunkId, content: impl Into<String>, text_rank: f32) -> Self {
        Self {
            id,
            content: content.into(),
            score: BranchScore::FullText { text_rank },
        }
    }

    pub fn tag(id: ChunkId, content: impl Into<String>, matched_tags: Vec<String>) -> Self {
        Self {
            id,
            content: content.into(),
            score: BranchScore::Tag {
                tag_score: matched_tags.len() as u32,
                matched_tags,
            },
        }
    }
}

/// A fused result carrying every branch's rank and score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    pub id: ChunkId,
    pub content: String,
    /// Branches that returned this chunk; never empty
    pub sources: BTreeSet<BranchKind>,
    pub vector_rank: Option<usize>,
    pub fulltext_rank: Option<usize>,
    pub tag_rank: Option<usize>,
    pub rrf_score: f64,
    pub similarity: Option<f32>,
    pub text_rank: Option<f32>,
    pub tag_score: Option<u32>,
    pub matched_tags: Option<Vec<String>>,
}

impl MergedResult {
    pub(crate) fn new(id: ChunkId, content: String) -> Self {
        Self {
            id,
            content,
            sources: BTreeSet::new(),
            vector_rank: None,
            fulltext_rank: None,
            tag_rank: None,
            rrf_score: 0.0,
            similarity: None,
            text_rank: None,
            tag_score: None,
            matched_tags: None,
        }
    }

    /// 1-based rank in `branch`, if the chunk appeared there
    pub fn rank(&self, branch: BranchKind) -> Option<usize> {
        match branch {
            BranchKind::Vector => self.vector_rank,
            BranchKind::FullText => self.fulltext_rank,
            BranchKind::Tags => self.tag_rank,
        }
    }

    pub(crate) fn set_rank(&mut self, branch: BranchKind, rank: usize) {
        let slot = match branch {
            BranchKind::Vector => &mut self.vector_rank,
            BranchKind::FullText => &mut self.fulltext_rank,
            BranchKind::Tags => &mut self.tag_rank,
        };
        *slot = Some(rank);
        self.sources.insert(branch);
    }

    /// Carry a branch's native score over unchanged
    pub(crate) fn absorb_score(&mut self, score: &BranchScore) {
        match score {
            BranchScore::Vector { similarity } => self.similarity = Some(*similarity),
            BranchScore::FullText { text_rank } => self.text_rank = Some(*text_rank),
            BranchScore::Tag {
                tag_score,
                matched_tags,
            } => {
                self.tag_score = Some(*tag_score);
                self.matched_tags = Some(matched_tags.clone());
            }
        }
    }
}
