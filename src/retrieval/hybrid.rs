//! Hybrid search combining vector, full-text and tag branches

use super::{
    normalize_tags, query_terms, reciprocal_rank_fusion, BranchHit, BranchKind, ChunkId, ExecutionMode,
    FusionConfig, MergedResult, SearchRequest, DEFAULT_CANDIDATE_MULTIPLIER,
};
use crate::embedding::EmbeddingClient;
use crate::storage::{BranchContext, SearchEvent, SearchStore, SearchTracker, StoreError};
use crate::timeframe::{normalize_at, TimeFilter, TimeframeError};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Timeframe error: {0}")]
    Timeframe(#[from] TimeframeError),

    #[error("All search branches failed: {0}")]
    AllBranchesFailed(String),

    #[error("Search deadline exceeded before any branch completed")]
    DeadlineExceeded,
}

/// Searcher-wide settings; requests may override some of them
#[derive(Debug, Clone)]
pub struct SearcherOptions {
    pub fusion: FusionConfig,
    /// Each branch fetches `limit × candidate_multiplier` candidates
    pub candidate_multiplier: usize,
    pub execution: ExecutionMode,
    /// Overall time budget per search
    pub deadline: Option<Duration>,
    /// Master switch for analytics; requests can only opt out
    pub track_searches: bool,
}

impl Default for SearcherOptions {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            candidate_multiplier: DEFAULT_CANDIDATE_MULTIPLIER,
            execution: ExecutionMode::Parallel,
            deadline: None,
            track_searches: true,
        }
    }
}

/// What happened to one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchStatus {
    Completed { hits: usize },
    /// Nothing to search with (blank query, no terms, no embedding)
    Skipped { reason: String },
    Failed { error: String },
    TimedOut,
}

impl BranchStatus {
    /// Completed and skipped branches both yield a trustworthy (possibly empty) list
    fn is_usable(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchOutcome {
    pub branch: BranchKind,
    #[serde(flatten)]
    pub status: BranchStatus,
    pub duration_ms: u64,
}

/// Fused results plus how they were produced
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<MergedResult>,
    /// Query actually searched, after timeframe extraction
    pub query: String,
    pub matched_expression: Option<String>,
    pub time_filter: Option<TimeFilter>,
    pub branches: Vec<BranchOutcome>,
    /// Set when the search was submitted for tracking
    pub search_id: Option<Uuid>,
    pub duration_ms: u64,
}

impl SearchResponse {
    pub fn branch(&self, kind: BranchKind) -> Option<&BranchOutcome> {
        self.branches.iter().find(|b| b.branch == kind)
    }
}

struct BranchRun {
    outcome: BranchOutcome,
    hits: Vec<BranchHit>,
}

impl BranchRun {
    fn without_hits(branch: BranchKind, status: BranchStatus, duration_ms: u64) -> Self {
        Self {
            outcome: BranchOutcome {
                branch,
                status,
                duration_ms,
            },
            hits: Vec::new(),
        }
    }
}

/// Result of embedding the query before the branches start
enum QueryEmbedding {
    Ready(Vec<f32>),
    Unavailable(BranchStatus),
}

/// Hybrid searcher fusing vector, full-text and tag search
pub struct HybridSearcher {
    store: Arc<dyn SearchStore>,
    embedder: Arc<EmbeddingClient>,
    tracker: Option<Arc<dyn SearchTracker>>,
    options: SearcherOptions,
}

impl HybridSearcher {
    /// Create a new hybrid searcher
    pub fn new(store: Arc<dyn SearchStore>, embedder: Arc<EmbeddingClient>, options: SearcherOptions) -> Self {
        Self {
            store,
            embedder,
            tracker: None,
            options,
        }
    }

    /// Record searches and clicks through `tracker`
    pub fn with_tracker(mut self, tracker: Arc<dyn SearchTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn options(&self) -> &SearcherOptions {
        &self.options
    }

    /// Perform hybrid search
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<MergedResult>, SearchError> {
        self.search_with_report(request).await.map(|response| response.results)
    }

    /// Perform hybrid search, reporting per-branch outcomes
    pub async fn search_with_report(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let started = std::time::Instant::now();
        Self::validate(request)?;

        let now = request.reference_time.unwrap_or_else(Utc::now);
        let normalized = normalize_at(&request.timeframe, &request.query, now)?;
        if let Some(expression) = &normalized.matched_expression {
            debug!("Timeframe '{}' removed from query", expression);
        }

        let deadline = request
            .deadline
            .or(self.options.deadline)
            .map(|budget| Instant::now() + budget);

        let ctx = Arc::new(BranchContext {
            limit: request
                .limit
                .saturating_mul(self.options.candidate_multiplier.max(1)),
            filters: request.filters.clone(),
            time_filter: normalized.filter.clone(),
            deadline,
        });

        let terms = query_terms(&normalized.query);
        let tags = if request.tags.is_empty() {
            terms.clone()
        } else {
            normalize_tags(&request.tags)
        };

        let embedding = self.embed_query(&normalized.query, deadline).await;

        let vector = self.vector_branch(embedding, request.threshold, &ctx);
        let fulltext = self.fulltext_branch(terms, &ctx);
        let tag = self.tag_branch(tags, &ctx);

        let (vector, fulltext, tag) = match request.execution.unwrap_or(self.options.execution) {
            ExecutionMode::Parallel => tokio::join!(vector, fulltext, tag),
            ExecutionMode::Sequential => {
                let vector = vector.await;
                let fulltext = fulltext.await;
                let tag = tag.await;
                (vector, fulltext, tag)
            }
        };

        let outcomes = vec![vector.outcome, fulltext.outcome, tag.outcome];
        if !outcomes.iter().any(|o| o.status.is_usable()) {
            return Err(Self::total_failure(&outcomes));
        }

        let mut results = reciprocal_rank_fusion(
            vec![
                (BranchKind::Vector, vector.hits),
                (BranchKind::FullText, fulltext.hits),
                (BranchKind::Tags, tag.hits),
            ],
            &self.options.fusion,
        );
        results.truncate(request.limit);

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Search fused {} results in {}ms ({})",
            results.len(),
            duration_ms,
            outcomes
                .iter()
                .map(|o| format!("{}: {:?}", o.branch, o.status))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let search_id = if request.track_search && self.options.track_searches {
            self.track_search(&normalized.query, results.len(), duration_ms, normalized.filter.clone())
        } else {
            None
        };

        Ok(SearchResponse {
            results,
            query: normalized.query,
            matched_expression: normalized.matched_expression,
            time_filter: normalized.filter,
            branches: outcomes,
            search_id,
            duration_ms,
        })
    }

    /// Record that a result was opened; failures are logged only
    pub fn record_click(&self, search_id: Uuid, chunk_id: ChunkId, position: usize) {
        let Some(tracker) = self.tracker.clone() else {
            return;
        };
        run_detached(move || {
            if let Err(e) = tracker.record_click(search_id, chunk_id, position) {
                warn!("Failed to record click on chunk {}: {}", chunk_id, e);
            }
        });
    }

    fn validate(request: &SearchRequest) -> Result<(), SearchError> {
        if request.query.trim().is_empty() {
            return Err(SearchError::InvalidQuery("Query text cannot be empty".to_string()));
        }
        if request.limit == 0 {
            return Err(SearchError::InvalidQuery("Limit must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&request.threshold) {
            return Err(SearchError::InvalidQuery(format!(
                "Similarity threshold {} is outside [0, 1]",
                request.threshold
            )));
        }
        Ok(())
    }

    fn total_failure(outcomes: &[BranchOutcome]) -> SearchError {
        if outcomes.iter().all(|o| o.status == BranchStatus::TimedOut) {
            return SearchError::DeadlineExceeded;
        }

        let details = outcomes
            .iter()
            .map(|o| match &o.status {
                BranchStatus::Failed { error } => format!("{}: {}", o.branch, error),
                BranchStatus::TimedOut => format!("{}: timed out", o.branch),
                other => format!("{}: {:?}", o.branch, other),
            })
            .collect::<Vec<_>>()
            .join("; ");
        SearchError::AllBranchesFailed(details)
    }

    /// Embed the cleaned query once, before any branch runs
    async fn embed_query(&self, query: &str, deadline: Option<Instant>) -> QueryEmbedding {
        let embedder = Arc::clone(&self.embedder);
        let query = query.to_string();

        match with_deadline(deadline, tokio::task::spawn_blocking(move || embedder.embed(&query))).await {
            Some(Ok(Ok(Some(vector)))) => QueryEmbedding::Ready(vector),
            Some(Ok(Ok(None))) => QueryEmbedding::Unavailable(BranchStatus::Skipped {
                reason: "query has no embeddable text".to_string(),
            }),
            Some(Ok(Err(e))) => {
                warn!(branch = %BranchKind::Vector, "Query embedding failed: {}", e);
                QueryEmbedding::Unavailable(BranchStatus::Failed {
                    error: e.to_string(),
                })
            }
            Some(Err(join_error)) => {
                warn!(branch = %BranchKind::Vector, "Query embedding task failed: {}", join_error);
                QueryEmbedding::Unavailable(BranchStatus::Failed {
                    error: join_error.to_string(),
                })
            }
            None => {
                warn!(branch = %BranchKind::Vector, "Query embedding hit the search deadline");
                QueryEmbedding::Unavailable(BranchStatus::TimedOut)
            }
        }
    }

    fn vector_branch(
        &self,
        embedding: QueryEmbedding,
        threshold: f32,
        ctx: &Arc<BranchContext>,
    ) -> impl Future<Output = BranchRun> {
        let store = Arc::clone(&self.store);
        let ctx = Arc::clone(ctx);

        async move {
            match embedding {
                QueryEmbedding::Ready(vector) => {
                    run_branch(BranchKind::Vector, ctx.deadline, {
                        let ctx = Arc::clone(&ctx);
                        move || store.vector_search(&vector, threshold, &ctx)
                    })
                    .await
                }
                QueryEmbedding::Unavailable(status) => BranchRun::without_hits(BranchKind::Vector, status, 0),
            }
        }
    }

    fn fulltext_branch(&self, terms: Vec<String>, ctx: &Arc<BranchContext>) -> impl Future<Output = BranchRun> {
        let store = Arc::clone(&self.store);
        let ctx = Arc::clone(ctx);

        async move {
            if terms.is_empty() {
                return BranchRun::without_hits(
                    BranchKind::FullText,
                    BranchStatus::Skipped {
                        reason: "query has no searchable terms".to_string(),
                    },
                    0,
                );
            }
            run_branch(BranchKind::FullText, ctx.deadline, {
                let ctx = Arc::clone(&ctx);
                move || store.fulltext_search(&terms, &ctx)
            })
            .await
        }
    }

    fn tag_branch(&self, tags: Vec<String>, ctx: &Arc<BranchContext>) -> impl Future<Output = BranchRun> {
        let store = Arc::clone(&self.store);
        let ctx = Arc::clone(ctx);

        async move {
            if tags.is_empty() {
                return BranchRun::without_hits(
                    BranchKind::Tags,
                    BranchStatus::Skipped {
                        reason: "no tags to match".to_string(),
                    },
                    0,
                );
            }
            run_branch(BranchKind::Tags, ctx.deadline, {
                let ctx = Arc::clone(&ctx);
                move || store.tag_search(&tags, &ctx)
            })
            .await
        }
    }

    fn track_search(
        &self,
        query: &str,
        result_count: usize,
        duration_ms: u64,
        timeframe: Option<TimeFilter>,
    ) -> Option<Uuid> {
        let tracker = self.tracker.clone()?;
        let event = SearchEvent {
            id: Uuid::new_v4(),
            query: query.to_string(),
            result_count,
            duration_ms,
            timeframe,
            created_at: Utc::now(),
        };
        let search_id = event.id;

        run_detached(move || {
            if let Err(e) = tracker.record_search(&event) {
                warn!("Failed to record search {}: {}", event.id, e);
            }
        });

        Some(search_id)
    }
}

/// Run one branch query on the blocking pool, bounded by `deadline`
async fn run_branch<F>(branch: BranchKind, deadline: Option<Instant>, query: F) -> BranchRun
where
    F: FnOnce() -> Result<Vec<BranchHit>, StoreError> + Send + 'static,
{
    let started = std::time::Instant::now();
    let joined = with_deadline(deadline, tokio::task::spawn_blocking(query)).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let status = match joined {
        Some(Ok(Ok(hits))) => {
            debug!(branch = %branch, "{} candidates in {}ms", hits.len(), duration_ms);
            return BranchRun {
                outcome: BranchOutcome {
                    branch,
                    status: BranchStatus::Completed { hits: hits.len() },
                    duration_ms,
                },
                hits,
            };
        }
        Some(Ok(Err(e))) => {
            warn!(branch = %branch, "Search branch failed: {}", e);
            BranchStatus::Failed { error: e.to_string() }
        }
        Some(Err(join_error)) => {
            warn!(branch = %branch, "Search branch task failed: {}", join_error);
            BranchStatus::Failed {
                error: join_error.to_string(),
            }
        }
        None => {
            warn!(branch = %branch, "Search branch timed out after {}ms", duration_ms);
            BranchStatus::TimedOut
        }
    };

    BranchRun::without_hits(branch, status, duration_ms)
}

/// Await `future` until `deadline`; `None` when the deadline passed first
async fn with_deadline<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

/// Run `work` on the blocking pool without waiting; inline outside a runtime
fn run_detached<F>(work: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(work);
        }
        Err(_) => work(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerRegistry;
    use crate::embedding::{EmbeddingSettings, HashingEmbeddingProvider};
    use crate::retrieval::BranchScore;
    use std::sync::Mutex;

    /// Store returning fixed hits, or failing / stalling per branch
    #[derive(Default)]
    struct FixtureStore {
        vector: Vec<BranchHit>,
        fulltext: Vec<BranchHit>,
        tags: Vec<BranchHit>,
        failing: Vec<BranchKind>,
        stall: Option<Duration>,
        seen_limits: Mutex<Vec<usize>>,
    }

    impl FixtureStore {
        fn answer(&self, branch: BranchKind, hits: &[BranchHit], ctx: &BranchContext) -> Result<Vec<BranchHit>, StoreError> {
            self.seen_limits.lock().unwrap().push(ctx.limit);
            if let Some(stall) = self.stall {
                std::thread::sleep(stall);
            }
            if self.failing.contains(&branch) {
                return Err(StoreError::Unavailable(format!("{} offline", branch)));
            }
            Ok(hits.to_vec())
        }
    }

    impl SearchStore for FixtureStore {
        fn vector_search(&self, _: &[f32], _: f32, ctx: &BranchContext) -> Result<Vec<BranchHit>, StoreError> {
            self.answer(BranchKind::Vector, &self.vector, ctx)
        }

        fn fulltext_search(&self, _: &[String], ctx: &BranchContext) -> Result<Vec<BranchHit>, StoreError> {
            self.answer(BranchKind::FullText, &self.fulltext, ctx)
        }

        fn tag_search(&self, _: &[String], ctx: &BranchContext) -> Result<Vec<BranchHit>, StoreError> {
            self.answer(BranchKind::Tags, &self.tags, ctx)
        }
    }

    fn searcher(store: FixtureStore) -> HybridSearcher {
        shared_searcher(Arc::new(store))
    }

    fn shared_searcher(store: Arc<FixtureStore>) -> HybridSearcher {
        let registry = CircuitBreakerRegistry::default();
        let embedder = EmbeddingClient::new(
            Arc::new(HashingEmbeddingProvider::new(32)),
            &registry,
            EmbeddingSettings::default(),
        );
        HybridSearcher::new(store, Arc::new(embedder), SearcherOptions::default())
    }

    fn fixture() -> FixtureStore {
        FixtureStore {
            vector: vec![BranchHit::vector(1, "one", 0.9), BranchHit::vector(2, "two", 0.8)],
            fulltext: vec![BranchHit::fulltext(1, "one", 0.8), BranchHit::fulltext(3, "three", 0.5)],
            tags: vec![BranchHit::tag(3, "three", vec!["rust".into()])],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fuses_all_branches() {
        let searcher = searcher(fixture());
        let results = searcher.search(&SearchRequest::new("rust ownership")).await.unwrap();

        let ids: Vec<ChunkId> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert!((results[0].rrf_score - 2.0 / 61.0).abs() < 1e-12);
        assert_eq!(results[1].sources.len(), 2);
        assert_eq!(results[1].tag_rank, Some(1));
    }

    #[tokio::test]
    async fn test_candidate_limit_is_multiplied() {
        let store = Arc::new(fixture());
        let searcher = shared_searcher(Arc::clone(&store));

        let results = searcher.search(&SearchRequest::new("rust").limit(1)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(*store.seen_limits.lock().unwrap(), vec![3, 3, 3]);
    }

    #[tokio::test]
    async fn test_sequential_matches_parallel() {
        let searcher = searcher(fixture());
        let parallel = searcher
            .search(&SearchRequest::new("rust").execution(ExecutionMode::Parallel))
            .await
            .unwrap();
        let sequential = searcher
            .search(&SearchRequest::new("rust").execution(ExecutionMode::Sequential))
            .await
            .unwrap();
        assert_eq!(parallel, sequential);
    }

    #[tokio::test]
    async fn test_failed_branch_degrades() {
        let store = FixtureStore {
            failing: vec![BranchKind::FullText],
            ..fixture()
        };
        let response = searcher(store)
            .search_with_report(&SearchRequest::new("rust"))
            .await
            .unwrap();

        assert!(matches!(
            response.branch(BranchKind::FullText).map(|b| &b.status),
            Some(BranchStatus::Failed { .. })
        ));
        let ids: Vec<ChunkId> = response.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert!(response.results.iter().all(|r| r.fulltext_rank.is_none()));
    }

    #[tokio::test]
    async fn test_all_branches_failed() {
        let store = FixtureStore {
            failing: BranchKind::ALL.to_vec(),
            ..fixture()
        };
        let result = searcher(store).search(&SearchRequest::new("rust")).await;
        assert!(matches!(result, Err(SearchError::AllBranchesFailed(_))));
    }

    #[tokio::test]
    async fn test_all_branches_timed_out() {
        let store = FixtureStore {
            stall: Some(Duration::from_millis(300)),
            ..fixture()
        };
        let result = searcher(store)
            .search(&SearchRequest::new("rust").deadline(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(SearchError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let searcher = searcher(fixture());
        assert!(matches!(
            searcher.search(&SearchRequest::new("   ")).await,
            Err(SearchError::InvalidQuery(_))
        ));
        assert!(matches!(
            searcher.search(&SearchRequest::new("q").limit(0)).await,
            Err(SearchError::InvalidQuery(_))
        ));
        assert!(matches!(
            searcher
                .search(&SearchRequest::new("q").timeframe(crate::timeframe::TimeframeInput::Range {
                    begin: Utc::now(),
                    end: Utc::now() - chrono::Duration::days(1),
                }))
                .await,
            Err(SearchError::Timeframe(TimeframeError::InvalidRange { .. }))
        ));
    }

    #[tokio::test]
    async fn test_auto_timeframe_cleans_query() {
        let response = searcher(fixture())
            .search_with_report(&SearchRequest::new("rust notes yesterday").auto_timeframe())
            .await
            .unwrap();
        assert_eq!(response.query, "rust notes");
        assert_eq!(response.matched_expression.as_deref(), Some("yesterday"));
        assert!(response.time_filter.is_some());
    }

    #[test]
    fn test_branch_score_variants_survive_fusion() {
        let fused = reciprocal_rank_fusion(
            vec![(BranchKind::Tags, vec![BranchHit::tag(1, "x", vec!["a".into()])])],
            &FusionConfig::default(),
        );
        assert_eq!(fused[0].tag_score, Some(1));
        assert!(matches!(
            BranchHit::tag(1, "x", vec![]).score,
            BranchScore::Tag { tag_score: 0, .. }
        ));
    }
}
