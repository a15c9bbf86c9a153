//! Storage layer for Sift
//!
//! The retrieval engine talks to persistence only through the traits here:
//! [`SearchStore`] answers the three branch queries, [`ChunkStore`] receives
//! ingested chunks and [`SearchTracker`] records search analytics.
//! [`SqliteStore`] implements all three.

pub mod database;

pub use database::{DbPool, SqliteStore, StoreStats};

use crate::retrieval::{BranchHit, ChunkId};
use crate::timeframe::TimeFilter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Structured filters applied by every branch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to these documents; empty means all
    #[serde(default)]
    pub document_ids: Vec<String>,

    /// Restrict to documents of this source type
    #[serde(default)]
    pub source_type: Option<String>,

    /// Restrict to documents carrying at least one of these tags
    #[serde(default)]
    pub tags_any: Vec<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty() && self.source_type.is_none() && self.tags_any.is_empty()
    }
}

/// Everything a branch query needs besides its own input
#[derive(Debug, Clone)]
pub struct BranchContext {
    /// Maximum candidates to return
    pub limit: usize,
    pub filters: SearchFilters,
    pub time_filter: Option<TimeFilter>,
    /// Past this instant the result will be discarded; stores may stop early
    pub deadline: Option<tokio::time::Instant>,
}

impl BranchContext {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            filters: SearchFilters::default(),
            time_filter: None,
            deadline: None,
        }
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| tokio::time::Instant::now() >= deadline)
    }
}

/// A source document as known to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: Option<String>,
    pub source_type: Option<String>,
    /// Lowercased on storage
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// BLAKE3 hash of the document text
    pub content_hash: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Result of writing a document record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Content changed or was never fully indexed; previous chunks were removed
    Updated,
    /// Same content already fully indexed
    Unchanged,
}

/// A chunk ready to persist, with its vector if embedding succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub embedding: Option<Vec<f32>>,
    /// Model that produced `embedding`
    pub model: Option<String>,
}

/// Analytics record for one executed search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEvent {
    pub id: Uuid,
    pub query: String,
    pub result_count: usize,
    pub duration_ms: u64,
    pub timeframe: Option<TimeFilter>,
    pub created_at: DateTime<Utc>,
}

/// Read side used by the hybrid searcher
///
/// Each method returns at most `ctx.limit` hits matching `ctx.filters` and
/// `ctx.time_filter`.
pub trait SearchStore: Send + Sync {
    /// Chunks whose cosine similarity to `embedding` is at least `threshold`
    fn vector_search(
        &self,
        embedding: &[f32],
        threshold: f32,
        ctx: &BranchContext,
    ) -> Result<Vec<BranchHit>, StoreError>;

    /// Chunks containing any of `terms`, ranked by the fraction matched
    fn fulltext_search(&self, terms: &[String], ctx: &BranchContext) -> Result<Vec<BranchHit>, StoreError>;

    /// Chunks whose document carries any of `tags`
    fn tag_search(&self, tags: &[String], ctx: &BranchContext) -> Result<Vec<BranchHit>, StoreError>;
}

/// Write side used by ingestion
pub trait ChunkStore: Send + Sync {
    fn upsert_document(&self, document: &DocumentRecord) -> Result<UpsertOutcome, StoreError>;

    fn store_chunk(&self, chunk: &StoredChunk) -> Result<ChunkId, StoreError>;

    /// Record that every chunk of `content_hash` is stored with a vector
    ///
    /// Until this is called, `upsert_document` treats the document as changed
    /// so a later ingest redoes it.
    fn mark_indexed(&self, document_id: &str, content_hash: &str) -> Result<(), StoreError>;
}

/// Search analytics sink
pub trait SearchTracker: Send + Sync {
    fn record_search(&self, event: &SearchEvent) -> Result<(), StoreError>;

    fn record_click(&self, search_id: Uuid, chunk_id: ChunkId, position: usize) -> Result<(), StoreError>;
}

/// Encode a vector as little-endian `f32` bytes
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "vector blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
