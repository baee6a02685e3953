//! In-process query cache.
//!
//! Entries are keyed by the normalized query, the retrieval parameters and the
//! generation of the snapshot that answered it, so a swap makes older entries
//! unreachable even before the cache is cleared.

use libris_core::config::{CacheBackend, CacheConfig};
use libris_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::RetrievalResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    query: String,
    k: usize,
    min_score_bits: u32,
    generation: u64,
}

impl CacheKey {
    pub fn new(query: &str, k: usize, min_score: f32, generation: u64) -> Self {
        Self {
            query: query.trim().to_lowercase(),
            k,
            min_score_bits: min_score.to_bits(),
            generation,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    result: RetrievalResult,
    inserted: Instant,
}

/// Bounded TTL map from query to retrieval result.
#[derive(Debug)]
pub struct QueryCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl QueryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Build the configured backend.
    ///
    /// Only the in-memory backend is compiled in; asking for redis is a
    /// configuration error.
    pub fn from_config(config: &CacheConfig) -> AppResult<Self> {
        match config.backend {
            CacheBackend::Memory => Ok(Self::new(
                Duration::from_secs(config.ttl_secs),
                config.capacity,
            )),
            CacheBackend::Redis => Err(AppError::Config(format!(
                "CACHE_BACKEND=redis ({}:{}/{}) is not supported by this build; use CACHE_BACKEND=memory",
                config.redis.host, config.redis.port, config.redis.db
            ))),
        }
    }

    fn enabled(&self) -> bool {
        self.capacity > 0 && !self.ttl.is_zero()
    }

    pub fn get(&self, key: &CacheKey) -> Option<RetrievalResult> {
        if !self.enabled() {
            return None;
        }

        let mut entries = self.entries.lock();
        let expired = entries.get(key)?.inserted.elapsed() >= self.ttl;
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|e| e.result.clone())
    }

    pub fn insert(&self, key: CacheKey, result: RetrievalResult) {
        if !self.enabled() {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted.elapsed() < ttl);

            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                result,
                inserted: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            tracing::debug!("Clearing {} cached queries", entries.len());
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
