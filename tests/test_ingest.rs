//! Ingestion into the SQLite store.

use serde_json::{json, Value};
use sift::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use sift::chunking::Chunker;
use sift::embedding::{
    EmbeddingClient, EmbeddingInput, EmbeddingProvider, EmbeddingSettings, HashingEmbeddingProvider,
    ProviderError,
};
use sift::ingest::{DocumentStatus, IngestDocument, IngestOptions, Ingestor};
use sift::retrieval::{BranchKind, HybridSearcher, SearchRequest, SearcherOptions};
use sift::storage::SqliteStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(&dir.path().join("nested").join("sift.db")).unwrap())
}

fn ingestor(store: &Arc<SqliteStore>, provider: Arc<dyn EmbeddingProvider>, chunk_size: usize) -> Ingestor {
    let registry = CircuitBreakerRegistry::default();
    let embedder = Arc::new(EmbeddingClient::new(provider, &registry, EmbeddingSettings::default()));
    Ingestor::new(
        store.clone(),
        embedder,
        IngestOptions {
            chunker: Chunker::new(chunk_size, chunk_size / 5),
            max_concurrent_documents: 3,
        },
    )
}

/// Provider that never answers
struct OfflineProvider;

impl EmbeddingProvider for OfflineProvider {
    fn name(&self) -> &str {
        "offline"
    }

    fn model(&self) -> &str {
        "offline-1"
    }

    fn request(&self, _input: &EmbeddingInput) -> Result<Value, ProviderError> {
        Err(ProviderError::Status {
            status: 503,
            body: "maintenance".to_string(),
        })
    }
}

/// Hashing provider behind a switchable outage
struct FlakyProvider {
    down: AtomicBool,
    inner: HashingEmbeddingProvider,
}

impl EmbeddingProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn request(&self, input: &EmbeddingInput) -> Result<Value, ProviderError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("connection refused".to_string()));
        }
        self.inner.request(input)
    }
}

fn handbook() -> String {
    (1..=12)
        .map(|i| format!("Section {} explains how the on-call rotation handles pages.", i))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn test_document_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ingestor = ingestor(&store, Arc::new(HashingEmbeddingProvider::new(32)), 120);

    let document = IngestDocument::new("handbook", handbook())
        .title("On-call handbook")
        .tags(["Ops", "oncall"])
        .metadata(json!({"owner": "sre"}));
    let report = ingestor.ingest(&document).unwrap();

    assert_eq!(report.status, DocumentStatus::Ingested);
    assert!(report.chunks_stored > 1);
    assert_eq!(store.chunk_count("handbook").unwrap(), report.chunks_stored);

    let stored = store.document("handbook").unwrap().unwrap();
    assert_eq!(stored.title.as_deref(), Some("On-call handbook"));
    assert_eq!(stored.tags, vec!["oncall", "ops"]);
    assert_eq!(stored.metadata, json!({"owner": "sre"}));
    assert_eq!(stored.created_at.timestamp(), document.created_at.timestamp());

    let stats = store.stats().unwrap();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.embedding_count, report.chunks_stored);
}

#[test]
fn test_reingest_skips_unchanged_and_replaces_changed() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ingestor = ingestor(&store, Arc::new(HashingEmbeddingProvider::new(32)), 120);

    let first = ingestor.ingest(&IngestDocument::new("handbook", handbook())).unwrap();
    let unchanged = ingestor.ingest(&IngestDocument::new("handbook", handbook())).unwrap();
    assert_eq!(unchanged.status, DocumentStatus::Unchanged);
    assert_eq!(store.chunk_count("handbook").unwrap(), first.chunks_stored);

    let replaced = ingestor
        .ingest(&IngestDocument::new("handbook", "Rotation moved to a weekly schedule."))
        .unwrap();
    assert_eq!(replaced.status, DocumentStatus::Ingested);
    assert_eq!(replaced.chunks_stored, 1);
    assert_eq!(store.chunk_count("handbook").unwrap(), 1);
    assert_eq!(store.stats().unwrap().embedding_count, 1);
}

#[tokio::test]
async fn test_chunks_without_vectors_stay_searchable() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ingestor = ingestor(&store, Arc::new(OfflineProvider), 120);

    let report = ingestor
        .ingest_all(vec![
            IngestDocument::new("handbook", handbook()).tags(["ops"]),
            IngestDocument::new("faq", "Pages escalate after fifteen minutes."),
        ])
        .await;

    assert_eq!(report.documents, 2);
    assert_eq!(report.documents_failed, 0);
    assert_eq!(report.chunks_embedded, 0);
    assert_eq!(report.chunks_failed, report.chunks_stored);

    let stats = store.stats().unwrap();
    assert_eq!(stats.chunk_count, report.chunks_stored);
    assert_eq!(stats.embedding_count, 0);

    let registry = CircuitBreakerRegistry::default();
    let embedder = Arc::new(EmbeddingClient::new(
        Arc::new(HashingEmbeddingProvider::new(32)),
        &registry,
        EmbeddingSettings::default(),
    ));
    let searcher = HybridSearcher::new(store.clone(), embedder, SearcherOptions::default());
    let response = searcher
        .search_with_report(&SearchRequest::new("escalate pages").threshold(0.0).track(false))
        .await
        .unwrap();

    assert!(response.results[0].content.contains("escalate"));
    assert!(response
        .results
        .iter()
        .all(|r| !r.sources.contains(&BranchKind::Vector)));
}

#[test]
fn test_delete_document_removes_chunks() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ingestor = ingestor(&store, Arc::new(HashingEmbeddingProvider::new(32)), 120);

    ingestor.ingest(&IngestDocument::new("handbook", handbook())).unwrap();
    assert!(store.delete_document("handbook").unwrap());
    assert!(!store.delete_document("handbook").unwrap());

    let stats = store.stats().unwrap();
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.chunk_count, 0);
    assert_eq!(stats.embedding_count, 0);
}

#[test]
fn test_reingest_after_outage_embeds_stored_chunks() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let provider = Arc::new(FlakyProvider {
        down: AtomicBool::new(true),
        inner: HashingEmbeddingProvider::new(32),
    });
    // Keep the circuit closed so recovery is seen on the next call.
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::new(100, Duration::from_secs(60), 1));
    let embedder = Arc::new(EmbeddingClient::new(
        provider.clone(),
        &registry,
        EmbeddingSettings::default(),
    ));
    let ingestor = Ingestor::new(
        store.clone(),
        embedder,
        IngestOptions {
            chunker: Chunker::new(120, 24),
            max_concurrent_documents: 1,
        },
    );

    let during = ingestor.ingest(&IngestDocument::new("handbook", handbook())).unwrap();
    assert_eq!(during.chunks_embedded, 0);
    assert_eq!(store.stats().unwrap().embedding_count, 0);

    provider.down.store(false, Ordering::SeqCst);
    let after = ingestor.ingest(&IngestDocument::new("handbook", handbook())).unwrap();
    assert_eq!(after.status, DocumentStatus::Ingested);
    assert_eq!(after.chunks_embedded, after.chunks_stored);

    let stats = store.stats().unwrap();
    assert_eq!(stats.chunk_count, after.chunks_stored);
    assert_eq!(stats.embedding_count, after.chunks_stored);

    let again = ingestor.ingest(&IngestDocument::new("handbook", handbook())).unwrap();
    assert_eq!(again.status, DocumentStatus::Unchanged);
}
