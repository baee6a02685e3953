//! Shared wiring for commands that touch the index.

use libris_core::{config::AppConfig, AppResult};
use libris_index::{
    ActiveIndex, ChunkStore, EmbeddingClient, IndexLifecycleManager, LifecycleSettings,
    QueryCache, RetrievalService, RetrievalSettings,
};
use std::sync::Arc;

/// The library as seen by one CLI invocation.
pub struct Library {
    pub embedder: Arc<EmbeddingClient>,
    pub active: Arc<ActiveIndex>,
    pub manager: Arc<IndexLifecycleManager>,
    pub retrieval: Arc<RetrievalService>,
}

impl Library {
    /// Build every component from `config` and load the active snapshot, if any.
    pub async fn open(config: &AppConfig) -> AppResult<Self> {
        let embedder = Arc::new(EmbeddingClient::from_settings(&config.embedding)?);
        let active = Arc::new(ActiveIndex::new());
        let cache = Arc::new(QueryCache::from_config(&config.cache)?);

        let manager = IndexLifecycleManager::new(
            LifecycleSettings::from_config(config),
            ChunkStore::from_config(&config.chunking),
            embedder.clone(),
            active.clone(),
        )
        .with_cache(cache.clone());
        manager.open().await?;

        let retrieval = RetrievalService::new(
            active.clone(),
            embedder.clone(),
            RetrievalSettings::from(&config.retrieval),
        )
        .with_cache(cache);

        tracing::debug!(
            "Library ready: provider={}, model={}, state={}",
            embedder.provider_name(),
            embedder.model_name(),
            manager.state()
        );

        Ok(Self {
            embedder,
            active,
            manager: Arc::new(manager),
            retrieval: Arc::new(retrieval),
        })
    }
}
