//! Document ingestion: chunk → embed → store
//!
//! Documents are processed concurrently, bounded by a semaphore. Within a
//! document, chunks are embedded in batches; when a batch fails each chunk is
//! retried alone, and a chunk that still fails is stored without a vector so
//! the lexical and tag branches can find it. A document is only skipped as
//! unchanged once all of its chunks were stored with vectors.

use crate::chunking::{Chunk, ChunkStrategy, Chunker};
use crate::embedding::EmbeddingClient;
use crate::storage::{ChunkStore, DocumentRecord, StoreError, StoredChunk, UpsertOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Ingestion task failed: {0}")]
    Task(String),
}

/// A document to ingest
#[derive(Debug, Clone)]
pub struct IngestDocument {
    pub document_id: String,
    pub title: Option<String>,
    pub text: String,
    pub source_type: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Overrides the ingestor's default strategy
    pub strategy: Option<ChunkStrategy>,
    pub metadata: serde_json::Value,
}

impl IngestDocument {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            title: None,
            text: text.into(),
            source_type: None,
            tags: Vec::new(),
            created_at: Utc::now(),
            strategy: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }

    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn content_hash(&self) -> String {
        blake3::hash(self.text.as_bytes()).to_hex().to_string()
    }
}

/// Per-document result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Ingested,
    /// Same content already stored with every vector; nothing re-embedded
    Unchanged,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunks_stored: usize,
    pub chunks_embedded: usize,
    pub chunks_failed: usize,
}

impl DocumentReport {
    fn empty(document_id: &str, status: DocumentStatus) -> Self {
        Self {
            document_id: document_id.to_string(),
            status,
            chunks_stored: 0,
            chunks_embedded: 0,
            chunks_failed: 0,
        }
    }
}

/// Result of ingesting a batch of documents
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub documents_unchanged: usize,
    pub documents_failed: usize,
    pub chunks_stored: usize,
    pub chunks_embedded: usize,
    /// Chunks stored without a vector
    pub chunks_failed: usize,
    pub duration_ms: u64,
    pub details: Vec<DocumentReport>,
}

impl IngestReport {
    fn absorb(&mut self, report: DocumentReport) {
        self.documents += 1;
        match report.status {
            DocumentStatus::Unchanged => self.documents_unchanged += 1,
            DocumentStatus::Failed { .. } => self.documents_failed += 1,
            DocumentStatus::Ingested => {}
        }
        self.chunks_stored += report.chunks_stored;
        self.chunks_embedded += report.chunks_embedded;
        self.chunks_failed += report.chunks_failed;
        self.details.push(report);
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub chunker: Chunker,
    pub max_concurrent_documents: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunker: Chunker::default(),
            max_concurrent_documents: 4,
        }
    }
}

/// Chunking, embedding and storage pipeline
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<EmbeddingClient>,
    options: IngestOptions,
}

impl Ingestor {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<EmbeddingClient>, options: IngestOptions) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    /// Ingest one document, blocking on the provider and the store
    pub fn ingest(&self, document: &IngestDocument) -> Result<DocumentReport, IngestError> {
        let record = DocumentRecord {
            id: document.document_id.clone(),
            title: document.title.clone(),
            source_type: document.source_type.clone(),
            tags: document.tags.clone(),
            created_at: document.created_at,
            content_hash: document.content_hash(),
            metadata: document.metadata.clone(),
        };

        if self.store.upsert_document(&record)? == UpsertOutcome::Unchanged {
            debug!("Document {} unchanged, skipping", document.document_id);
            return Ok(DocumentReport::empty(&document.document_id, DocumentStatus::Unchanged));
        }

        let chunker = match document.strategy {
            Some(strategy) => self.options.chunker.with_strategy(strategy),
            None => self.options.chunker,
        };
        let chunks = chunker.chunk(&document.text);
        let vectors = self.embed_chunks(&document.document_id, &chunks);

        let mut report = DocumentReport::empty(&document.document_id, DocumentStatus::Ingested);
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            let embedded = vector.is_some();
            self.store.store_chunk(&StoredChunk {
                document_id: document.document_id.clone(),
                chunk_index: chunk.index,
                content: chunk.content,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                model: vector.as_ref().map(|_| self.embedder.model().to_string()),
                embedding: vector,
            })?;

            report.chunks_stored += 1;
            if embedded {
                report.chunks_embedded += 1;
            } else {
                report.chunks_failed += 1;
            }
        }

        if report.chunks_failed == 0 {
            self.store.mark_indexed(&record.id, &record.content_hash)?;
        } else {
            info!(
                "{} of {} chunks of {} stored without vectors; the next ingest retries them",
                report.chunks_failed, report.chunks_stored, document.document_id
            );
        }

        debug!(
            "Ingested {}: {} chunks, {} embedded",
            document.document_id, report.chunks_stored, report.chunks_embedded
        );
        Ok(report)
    }

    /// Ingest many documents concurrently
    ///
    /// A document that fails is reported in `details` and never aborts the
    /// others.
    pub async fn ingest_all(&self, documents: Vec<IngestDocument>) -> IngestReport {
        let start = std::time::Instant::now();
        let total = documents.len();
        info!("Starting ingestion of {} documents", total);

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_documents.max(1)));
        let mut handles = Vec::with_capacity(total);

        for document in documents {
            let semaphore = Arc::clone(&semaphore);
            let ingestor = self.clone();
            let document_id = document.document_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| IngestError::Task(e.to_string()))?;

                tokio::task::spawn_blocking(move || ingestor.ingest(&document))
                    .await
                    .map_err(|e| IngestError::Task(e.to_string()))?
            });
            handles.push((document_id, handle));
        }

        let mut report = IngestReport::default();
        for (document_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(IngestError::Task(e.to_string())),
            };

            match result {
                Ok(document_report) => report.absorb(document_report),
                Err(e) => {
                    warn!("Failed to ingest {}: {}", document_id, e);
                    report.absorb(DocumentReport::empty(
                        &document_id,
                        DocumentStatus::Failed { error: e.to_string() },
                    ));
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Ingestion complete: {} documents ({} unchanged, {} failed), {} chunks stored, {} embedded, {}ms",
            report.documents,
            report.documents_unchanged,
            report.documents_failed,
            report.chunks_stored,
            report.chunks_embedded,
            report.duration_ms
        );

        report
    }

    /// One optional vector per chunk, in chunk order
    fn embed_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Vec<Option<Vec<f32>>> {
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        if chunks.is_empty() {
            return vectors;
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        match self.embedder.embed_batch(&texts) {
            Ok(pairs) => {
                for (index, vector) in pairs {
                    vectors[index] = Some(vector);
                }
                return vectors;
            }
            Err(e) if e.is_open() => {
                warn!(
                    "Embedding provider unavailable for {}; storing {} chunks without vectors: {}",
                    document_id,
                    chunks.len(),
                    e
                );
                return vectors;
            }
            Err(e) => {
                warn!("Batch embedding failed for {}, retrying per chunk: {}", document_id, e);
            }
        }

        for (slot, chunk) in vectors.iter_mut().zip(chunks) {
            match self.embedder.embed(&chunk.content) {
                Ok(vector) => *slot = vector,
                Err(e) if e.is_open() => {
                    warn!("Embedding circuit opened while ingesting {}: {}", document_id, e);
                    break;
                }
                Err(e) => {
                    warn!("Chunk {} of {} failed to embed: {}", chunk.index, document_id, e);
                }
            }
        }

        vectors
    }
}
