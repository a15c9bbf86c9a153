//! `Sift` facade wiring store, embedding client, searcher and ingestor from a `Config`

use crate::breaker::{CircuitBreakerRegistry, CircuitBreakerSnapshot};
use crate::chunking::{Chunk, Chunker};
use crate::config::Config;
use crate::embedding::{EmbeddingClient, EmbeddingProvider, HashingEmbeddingProvider, HttpEmbeddingProvider};
use crate::error::{Result, SiftError};
use crate::ingest::{DocumentReport, IngestDocument, IngestReport, Ingestor};
use crate::retrieval::{ChunkId, HybridSearcher, MergedResult, SearchRequest, SearchResponse};
use crate::storage::{SqliteStore, StoreStats};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Dimension used by the hashing provider when none is configured
const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Hybrid retrieval engine over a SQLite knowledge base
///
/// Construct outside an async context: the HTTP provider owns a blocking
/// client that must not be created on a runtime thread.
pub struct Sift {
    config: Config,
    store: Arc<SqliteStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    embedder: Arc<EmbeddingClient>,
    searcher: HybridSearcher,
    ingestor: Ingestor,
    chunker: Chunker,
}

impl Sift {
    /// Open the configured database and provider
    pub fn open(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.database_path()?)?);
        let provider = build_provider(&config)?;
        Self::with_parts(config, store, provider)
    }

    /// Assemble an engine from an existing store and provider
    pub fn with_parts(
        config: Config,
        store: Arc<SqliteStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_config()?));
        let embedder = Arc::new(EmbeddingClient::new(
            provider,
            &breakers,
            config.embedding_settings(),
        ));

        let searcher = HybridSearcher::new(store.clone(), embedder.clone(), config.searcher_options()?)
            .with_tracker(store.clone());
        let ingestor = Ingestor::new(store.clone(), embedder.clone(), config.ingest_options()?);
        let chunker = config.chunker()?;

        info!(
            "sift ready (provider: {}, model: {})",
            embedder.provider_name(),
            embedder.model()
        );

        Ok(Self {
            config,
            store,
            breakers,
            embedder,
            searcher,
            ingestor,
            chunker,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// A request carrying the configured default limit and threshold
    pub fn request(&self, query: impl Into<String>) -> SearchRequest {
        SearchRequest::new(query)
            .limit(self.config.retrieval.default_limit)
            .threshold(self.config.retrieval.similarity_threshold)
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<MergedResult>> {
        Ok(self.searcher.search(request).await?)
    }

    pub async fn search_with_report(&self, request: &SearchRequest) -> Result<SearchResponse> {
        Ok(self.searcher.search_with_report(request).await?)
    }

    /// Embed one text through the breaker; blocks on the provider
    pub fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.embedder.embed(text)?)
    }

    /// Split text with the configured chunker
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        self.chunker.chunk(text)
    }

    /// Ingest one document; blocks on the provider and the store
    pub fn ingest(&self, document: &IngestDocument) -> Result<DocumentReport> {
        Ok(self.ingestor.ingest(document)?)
    }

    pub async fn ingest_all(&self, documents: Vec<IngestDocument>) -> IngestReport {
        self.ingestor.ingest_all(documents).await
    }

    pub fn record_click(&self, search_id: Uuid, chunk_id: ChunkId, position: usize) {
        self.searcher.record_click(search_id, chunk_id, position);
    }

    pub fn breaker_stats(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn reset_breakers(&self) {
        self.breakers.reset_all();
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }
}

/// Build the configured embedding provider
pub fn build_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.embedding.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbeddingProvider::new(
            config.embedding.dimension.unwrap_or(DEFAULT_HASHING_DIMENSION),
        ))),
        "http" => Ok(Arc::new(HttpEmbeddingProvider::new(
            config.http_provider_settings()?,
        )?)),
        other => Err(SiftError::InvalidConfigValue {
            path: "embedding.provider".to_string(),
            message: format!("Unknown provider '{}'", other),
        }),
    }
}
