//! Hybrid retrieval with Reciprocal Rank Fusion
//!
//! This module runs vector, full-text and tag search as independent branches
//! and fuses their rankings into one list.

mod fusion;
mod hybrid;
mod terms;
mod types;

pub use fusion::{rank_branch, reciprocal_rank_fusion, FusionConfig, FusionError, DEFAULT_RRF_K};
pub use hybrid::{BranchOutcome, BranchStatus, HybridSearcher, SearchError, SearchResponse, SearcherOptions};
pub use terms::{normalize_tags, query_terms, tokenize};
pub use types::{BranchHit, BranchKind, BranchScore, ChunkId, MergedResult};

use crate::storage::SearchFilters;
use crate::timeframe::TimeframeInput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
pub const DEFAULT_CANDIDATE_MULTIPLIER: usize = 3;

/// How the three branches are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

/// Search query with optional filters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text
    pub query: String,

    /// Maximum number of fused results
    pub limit: usize,

    /// Minimum cosine similarity for vector hits
    pub threshold: f32,

    pub timeframe: TimeframeInput,

    pub filters: SearchFilters,

    /// Tags for the tag branch; the query terms are used when empty
    pub tags: Vec<String>,

    /// Record the search for analytics
    pub track_search: bool,

    /// Overrides the searcher's configured mode
    pub execution: Option<ExecutionMode>,

    /// Overrides the searcher's configured deadline
    #[serde(skip)]
    pub deadline: Option<Duration>,

    /// Instant relative timeframe phrases are resolved against; now if unset
    pub reference_time: Option<DateTime<Utc>>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            timeframe: TimeframeInput::None,
            filters: SearchFilters::default(),
            tags: Vec::new(),
            track_search: true,
            execution: None,
            deadline: None,
            reference_time: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn timeframe(mut self, timeframe: TimeframeInput) -> Self {
        self.timeframe = timeframe;
        self
    }

    /// Detect a timeframe phrase in the query and remove it
    pub fn auto_timeframe(self) -> Self {
        self.timeframe(TimeframeInput::AutoDetect)
    }

    pub fn filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn track(mut self, track_search: bool) -> Self {
        self.track_search = track_search;
        self
    }

    pub fn execution(mut self, mode: ExecutionMode) -> Self {
        self.execution = Some(mode);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn at(mut self, reference_time: DateTime<Utc>) -> Self {
        self.reference_time = Some(reference_time);
        self
    }
}
