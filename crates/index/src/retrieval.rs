//! Serve-time retrieval.
//!
//! Every failure at query time is reported as a NOT_FOUND result with a
//! reason; callers never see a raw error.

use libris_core::config::RetrievalConfig;
use libris_core::{AppError, EmbeddingErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::active::ActiveIndex;
use crate::cache::{CacheKey, QueryCache};
use crate::embeddings::EmbeddingClient;
use crate::types::{NotFoundReason, RetrievalResult, ScoredChunk};

/// Keep only the leading results when they are all strong matches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusFilter {
    pub top_n: usize,
    pub min_score: f32,
}

impl FocusFilter {
    /// If the first `top_n` results (or all of them, when fewer) score at
    /// least `min_score`, drop everything after them.
    pub fn apply(&self, mut results: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let top_n = self.top_n.min(results.len());
        if top_n == 0 {
            return results;
        }

        if results[..top_n].iter().all(|r| r.score >= self.min_score) {
            if results.len() > top_n {
                tracing::debug!(
                    "Focus filter: top {} results score >= {}, dropping {} weaker ones",
                    top_n,
                    self.min_score,
                    results.len() - top_n
                );
            }
            results.truncate(top_n);
        }
        results
    }
}

/// Retrieval defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub focus: Option<FocusFilter>,
    pub query_timeout: Duration,
}

impl From<&RetrievalConfig> for RetrievalSettings {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_score: config.score_threshold,
            focus: config.focus_enabled.then_some(FocusFilter {
                top_n: config.focus_top_n,
                min_score: config.focus_score_threshold,
            }),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

/// Answers similarity queries against the active snapshot.
#[derive(Debug)]
pub struct RetrievalService {
    active: Arc<ActiveIndex>,
    embedder: Arc<EmbeddingClient>,
    cache: Option<Arc<QueryCache>>,
    settings: RetrievalSettings,
}

impl RetrievalService {
    pub fn new(
        active: Arc<ActiveIndex>,
        embedder: Arc<EmbeddingClient>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            active,
            embedder,
            cache: None,
            settings,
        }
    }

    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Retrieve with the configured `top_k` and threshold.
    pub async fn retrieve_default(&self, query: &str) -> RetrievalResult {
        self.retrieve(query, self.settings.top_k, self.settings.min_score)
            .await
    }

    /// Return up to `k` chunks scoring at least `min_score`, or NOT_FOUND.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn retrieve(&self, query: &str, k: usize, min_score: f32) -> RetrievalResult {
        let query = query.trim();
        if query.is_empty() {
            return RetrievalResult::not_found(NotFoundReason::EmptyQuery);
        }

        // One snapshot for the whole query, even if a swap happens meanwhile
        let (snapshot, generation) = self.active.current_with_generation();
        let Some(snapshot) = snapshot else {
            tracing::warn!("Query received but no index is active");
            return RetrievalResult::not_found(NotFoundReason::NoActiveIndex);
        };

        let key = CacheKey::new(query, k, min_score, generation);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            tracing::debug!("Cache hit for generation {}", generation);
            return cached;
        }

        let vector = match self
            .embedder
            .embed_query(query, self.settings.query_timeout)
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("Query embedding failed: {}", e);
                let reason = match e {
                    AppError::EmbeddingService {
                        kind: EmbeddingErrorKind::Timeout,
                        ..
                    } => NotFoundReason::EmbeddingTimeout,
                    _ => NotFoundReason::EmbeddingFailed,
                };
                return RetrievalResult::not_found(reason);
            }
        };

        let results = match snapshot.query(&vector, k, min_score) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("Query against generation {} failed: {}", generation, e);
                return RetrievalResult::not_found(NotFoundReason::IncompatibleIndex);
            }
        };

        let result = if results.is_empty() {
            tracing::info!(
                "No relevant chunks found (all scores below {:.2} threshold)",
                min_score
            );
            RetrievalResult::not_found(NotFoundReason::BelowThreshold)
        } else {
            let results = match &self.settings.focus {
                Some(focus) => focus.apply(results),
                None => results,
            };
            tracing::info!(
                "Retrieved {} relevant chunks (top score: {:.3}, lowest: {:.3})",
                results.len(),
                results.first().map(|r| r.score).unwrap_or(0.0),
                results.last().map(|r| r.score).unwrap_or(0.0)
            );
            RetrievalResult::Found { chunks: results }
        };

        if let Some(cache) = &self.cache {
            cache.insert(key, result.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingProvider, RetryPolicy};
    use crate::vector_index::tests::chunk;
    use crate::vector_index::Snapshot;
    use libris_core::AppResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps a query to a fixed axis and counts calls.
    #[derive(Debug, Default)]
    struct AxisProvider {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn provider_name(&self) -> &str {
            "axis"
        }

        fn model_name(&self) -> &str {
            "axis-v1"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("east") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    fn service(provider: Arc<AxisProvider>) -> (RetrievalService, Arc<ActiveIndex>) {
        let active = Arc::new(ActiveIndex::new());
        let embedder = Arc::new(EmbeddingClient::new(
            provider,
            10,
            Duration::from_secs(5),
            RetryPolicy::default(),
        ));
        let settings = RetrievalSettings {
            focus: None,
            ..Default::default()
        };
        let service = RetrievalService::new(active.clone(), embedder, settings)
            .with_cache(Arc::new(QueryCache::new(Duration::from_secs(60), 16)));
        (service, active)
    }

    fn scored(id: u64, score: f32) -> ScoredChunk {
        let mut c = chunk(id, vec![]);
        c.embedding = None;
        ScoredChunk { chunk: c, score }
    }

    #[test]
    fn test_focus_filter() {
        let filter = FocusFilter {
            top_n: 2,
            min_score: 0.4,
        };

        let strong = vec![scored(0, 0.9), scored(1, 0.5), scored(2, 0.3)];
        assert_eq!(filter.apply(strong).len(), 2);

        let mixed = vec![scored(0, 0.9), scored(1, 0.35), scored(2, 0.3)];
        assert_eq!(filter.apply(mixed).len(), 3);

        let short = vec![scored(0, 0.9)];
        assert_eq!(filter.apply(short).len(), 1);
        assert!(filter.apply(vec![]).is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_and_no_index() {
        let (service, _active) = service(Arc::new(AxisProvider::default()));
        assert_eq!(
            service.retrieve("   ", 3, 0.1).await,
            RetrievalResult::not_found(NotFoundReason::EmptyQuery)
        );
        assert_eq!(
            service.retrieve("east", 3, 0.1).await,
            RetrievalResult::not_found(NotFoundReason::NoActiveIndex)
        );
    }

    #[tokio::test]
    async fn test_found_and_below_threshold() {
        let (service, active) = service(Arc::new(AxisProvider::default()));
        active.swap(Arc::new(
            Snapshot::build(
                vec![chunk(0, vec![1.0, 0.0]), chunk(1, vec![0.6, 0.8])],
                "axis-v1",
            )
            .unwrap(),
        ));

        let result = service.retrieve("head east", 5, 0.5).await;
        let ids: Vec<u64> = result.chunks().iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![0, 1]);

        let result = service.retrieve("head north", 5, 0.9).await;
        assert_eq!(
            result,
            RetrievalResult::not_found(NotFoundReason::BelowThreshold)
        );
    }

    #[tokio::test]
    async fn test_cache_hit_and_invalidation_by_swap() {
        let provider = Arc::new(AxisProvider::default());
        let (service, active) = service(provider.clone());
        active.swap(Arc::new(
            Snapshot::build(vec![chunk(0, vec![1.0, 0.0])], "axis-v1").unwrap(),
        ));

        let first = service.retrieve("East", 1, 0.5).await;
        assert!(first.is_found());
        let second = service.retrieve("  east ", 1, 0.5).await;
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        active.swap(Arc::new(
            Snapshot::build(vec![chunk(9, vec![1.0, 0.0])], "axis-v1").unwrap(),
        ));
        let third = service.retrieve("east", 1, 0.5).await;
        assert_eq!(third.chunks()[0].chunk.id, 9);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_not_found() {
        let (service, active) = service(Arc::new(AxisProvider::default()));
        active.swap(Arc::new(
            Snapshot::build(vec![chunk(0, vec![1.0, 0.0, 0.0])], "other").unwrap(),
        ));
        assert_eq!(
            service.retrieve("east", 1, 0.0).await,
            RetrievalResult::not_found(NotFoundReason::IncompatibleIndex)
        );
    }
}
