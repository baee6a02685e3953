//! Embedding provider trait and factory.

use libris_core::config::EmbeddingSettings;
use libris_core::{AppError, AppResult, EmbeddingErrorKind};
use std::sync::Arc;

use super::providers::{mock::MockProvider, openai::OpenAiProvider};

/// Trait for embedding providers.
///
/// A provider performs exactly one remote call per `embed_batch`; batching,
/// deadlines and retries are handled by [`super::EmbeddingClient`].
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "openai")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results.pop().ok_or_else(|| {
            AppError::embedding(EmbeddingErrorKind::Malformed, "No embedding returned")
        })
    }
}

/// Create an embedding provider based on configuration.
pub fn create_provider(settings: &EmbeddingSettings) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match settings.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider::new(settings.dimensions))),

        "openai" => Ok(Arc::new(OpenAiProvider::new(settings)?)),

        _ => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: openai, mock",
            settings.provider
        ))),
    }
}
