//! Batching embedding client with deadlines and retries.

use libris_core::config::EmbeddingSettings;
use libris_core::{AppError, AppResult, EmbeddingErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::provider::{create_provider, EmbeddingProvider};
use crate::progress::ProgressReporter;

/// Text sent to the service by [`EmbeddingClient::health_check`].
const HEALTH_CHECK_TEXT: &str = "library health check";

/// Rough characters-per-token ratio used for usage estimates.
const CHARS_PER_TOKEN: u64 = 4;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

/// Usage counters for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingStats {
    /// Service calls, including retries
    pub calls: u64,
    /// Texts embedded successfully
    pub texts: u64,
    /// Estimated tokens sent
    pub estimated_tokens: u64,
}

/// Converts texts into vectors through a provider.
///
/// Splits input into batches, puts a deadline on every call, retries
/// transient failures with backoff and checks that every response has one
/// vector of the expected dimensionality per input.
#[derive(Debug)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    request_timeout: Duration,
    retry: RetryPolicy,
    calls: AtomicU64,
    texts: AtomicU64,
    tokens: AtomicU64,
}

impl EmbeddingClient {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            request_timeout,
            retry,
            calls: AtomicU64::new(0),
            texts: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
        }
    }

    /// Build the configured provider and wrap it.
    pub fn from_settings(settings: &EmbeddingSettings) -> AppResult<Self> {
        let provider = create_provider(settings)?;
        Ok(Self::new(
            provider,
            settings.batch_size,
            Duration::from_secs(settings.request_timeout_secs),
            RetryPolicy {
                max_attempts: settings.max_attempts.max(1),
                initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            },
        ))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            calls: self.calls.load(Ordering::Relaxed),
            texts: self.texts.load(Ordering::Relaxed),
            estimated_tokens: self.tokens.load(Ordering::Relaxed),
        }
    }

    /// Embed texts, preserving input order.
    pub async fn embed(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.embed_with_progress(texts, &ProgressReporter::noop())
            .await
    }

    /// Embed texts batch by batch, reporting progress after each batch.
    #[instrument(skip(self, texts, progress), fields(count = texts.len(), model = %self.model_name()))]
    pub async fn embed_with_progress(
        &self,
        texts: &[String],
        progress: &ProgressReporter,
    ) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let total = texts.len() as u64;
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                "Embedding batch {} ({} texts)",
                batch_index + 1,
                batch.len()
            );
            let embedded = self.call_with_retry(batch, self.request_timeout).await?;
            vectors.extend(embedded);
            progress.embed(vectors.len() as u64, total, self.model_name());
        }

        Ok(vectors)
    }

    /// Embed a single query under its own deadline.
    pub async fn embed_query(&self, text: &str, timeout: Duration) -> AppResult<Vec<f32>> {
        let batch = [text.to_string()];
        let mut vectors = self.call_with_retry(&batch, timeout).await?;
        vectors.pop().ok_or_else(|| {
            AppError::embedding(EmbeddingErrorKind::Malformed, "No embedding returned")
        })
    }

    /// Embed a short string to surface credential and configuration errors early.
    pub async fn health_check(&self) -> AppResult<()> {
        self.embed_query(HEALTH_CHECK_TEXT, self.request_timeout).await?;
        tracing::info!(
            "Embedding service ready: provider={}, model={}, dimensions={}",
            self.provider_name(),
            self.model_name(),
            self.dimensions()
        );
        Ok(())
    }

    async fn call_with_retry(
        &self,
        batch: &[String],
        timeout: Duration,
    ) -> AppResult<Vec<Vec<f32>>> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.calls.fetch_add(1, Ordering::Relaxed);

            let result = match tokio::time::timeout(timeout, self.provider.embed_batch(batch)).await
            {
                Ok(result) => result.and_then(|vectors| self.check_response(batch, vectors)),
                Err(_) => Err(AppError::embedding(
                    EmbeddingErrorKind::Timeout,
                    format!("Embedding call exceeded {:?}", timeout),
                )),
            };

            match result {
                Ok(vectors) => {
                    let chars: u64 = batch.iter().map(|t| t.chars().count() as u64).sum();
                    self.texts.fetch_add(batch.len() as u64, Ordering::Relaxed);
                    self.tokens
                        .fetch_add(chars.div_ceil(CHARS_PER_TOKEN), Ordering::Relaxed);
                    return Ok(vectors);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        "Embedding failed (attempt {}/{}), retrying in {}ms: {}",
                        attempt,
                        max_attempts,
                        backoff.as_millis(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!("Embedding failed after {} attempts: {}", attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    fn check_response(
        &self,
        batch: &[String],
        vectors: Vec<Vec<f32>>,
    ) -> AppResult<Vec<Vec<f32>>> {
        if vectors.len() != batch.len() {
            return Err(AppError::embedding(
                EmbeddingErrorKind::Malformed,
                format!(
                    "Expected {} embeddings, received {}",
                    batch.len(),
                    vectors.len()
                ),
            ));
        }

        let expected = self.dimensions();
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != expected) {
            return Err(AppError::embedding(
                EmbeddingErrorKind::Malformed,
                format!(
                    "Embedding {} has {} dimensions, expected {}",
                    i,
                    v.len(),
                    expected
                ),
            ));
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::mock::MockProvider;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` calls with `kind`, then delegates to the mock.
    #[derive(Debug)]
    struct FlakyProvider {
        inner: MockProvider,
        failures: u32,
        kind: EmbeddingErrorKind,
        calls: AtomicU32,
        batch_sizes: parking_lot::Mutex<Vec<usize>>,
    }

    impl FlakyProvider {
        fn new(failures: u32, kind: EmbeddingErrorKind) -> Self {
            Self {
                inner: MockProvider::new(16),
                failures,
                kind,
                calls: AtomicU32::new(0),
                batch_sizes: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn provider_name(&self) -> &str {
            "flaky"
        }

        fn model_name(&self) -> &str {
            "flaky-v1"
        }

        fn dimensions(&self) -> usize {
            16
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            self.batch_sizes.lock().push(texts.len());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AppError::embedding(self.kind, "injected failure"));
            }
            self.inner.embed_batch(texts).await
        }
    }

    #[derive(Debug)]
    struct SlowProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn provider_name(&self) -> &str {
            "slow"
        }

        fn model_name(&self) -> &str {
            "slow-v1"
        }

        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![vec![0.0; 4]; texts.len()])
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text number {}", i)).collect()
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let provider = Arc::new(FlakyProvider::new(0, EmbeddingErrorKind::Timeout));
        let client = EmbeddingClient::new(
            provider.clone(),
            2,
            Duration::from_secs(5),
            fast_retry(),
        );

        let input = texts(5);
        let vectors = client.embed(&input).await.unwrap();

        let reference = MockProvider::new(16);
        for (text, vector) in input.iter().zip(&vectors) {
            assert_eq!(&reference.embed(text).await.unwrap(), vector);
        }
        assert_eq!(*provider.batch_sizes.lock(), vec![2, 2, 1]);

        let stats = client.stats();
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.texts, 5);
        assert!(stats.estimated_tokens > 0);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(FlakyProvider::new(2, EmbeddingErrorKind::RateLimited));
        let client = EmbeddingClient::new(
            provider.clone(),
            10,
            Duration::from_secs(5),
            fast_retry(),
        );

        let vectors = client.embed(&texts(3)).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let provider = Arc::new(FlakyProvider::new(10, EmbeddingErrorKind::Unavailable));
        let client = EmbeddingClient::new(
            provider.clone(),
            10,
            Duration::from_secs(5),
            fast_retry(),
        );

        let err = client.embed(&texts(3)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::EmbeddingService {
                kind: EmbeddingErrorKind::Unavailable,
                ..
            }
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let provider = Arc::new(FlakyProvider::new(1, EmbeddingErrorKind::Auth));
        let client = EmbeddingClient::new(
            provider.clone(),
            10,
            Duration::from_secs(5),
            fast_retry(),
        );

        let err = client.embed(&texts(1)).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_timeout() {
        let client = EmbeddingClient::new(
            Arc::new(SlowProvider),
            10,
            Duration::from_millis(20),
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
            },
        );

        let err = client
            .embed_query("slow", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::EmbeddingService {
                kind: EmbeddingErrorKind::Timeout,
                ..
            }
        ));
        assert_eq!(client.stats().calls, 2);
    }

    #[tokio::test]
    async fn test_wrong_dimensions_rejected() {
        // Provider claims 8 dimensions but the mock inside returns 16
        #[derive(Debug)]
        struct Liar(MockProvider);

        #[async_trait::async_trait]
        impl EmbeddingProvider for Liar {
            fn provider_name(&self) -> &str {
                "liar"
            }
            fn model_name(&self) -> &str {
                "liar-v1"
            }
            fn dimensions(&self) -> usize {
                8
            }
            async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
                self.0.embed_batch(texts).await
            }
        }

        let client = EmbeddingClient::new(
            Arc::new(Liar(MockProvider::new(16))),
            10,
            Duration::from_secs(5),
            fast_retry(),
        );

        let err = client.embed(&texts(2)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::EmbeddingService {
                kind: EmbeddingErrorKind::Malformed,
                ..
            }
        ));
        assert_eq!(client.stats().calls, 1);
    }

    #[tokio::test]
    async fn test_health_check_with_mock() {
        let settings = EmbeddingSettings {
            provider: "mock".to_string(),
            dimensions: 32,
            ..Default::default()
        };
        let client = EmbeddingClient::from_settings(&settings).unwrap();
        client.health_check().await.unwrap();
        assert_eq!(client.model_name(), "trigram-v1");
    }
}
