//! End-to-end lifecycle tests: ingest, promote, query, back up and restore.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use libris_core::{AppError, AppResult, EmbeddingErrorKind};
use libris_index::backup;
use libris_index::lifecycle::now_local;
use libris_index::{
    ActiveIndex, ChunkStore, ChunkingPolicy, EmbeddingClient, EmbeddingProvider,
    IndexLifecycleManager, IndexState, LifecycleSettings, NotFoundReason, ProgressReporter,
    QueryCache, RetrievalResult, RetrievalService, RetrievalSettings, RetryPolicy,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const KEYWORDS: [&str; 3] = ["whale", "tulip", "rover"];

/// One axis per keyword, plus one for everything else.
///
/// Once `fail_after` texts have been embedded, every further call fails with
/// a permanent error.
#[derive(Debug)]
struct KeywordProvider {
    embedded: AtomicUsize,
    fail_after: AtomicUsize,
}

impl KeywordProvider {
    fn new() -> Self {
        Self {
            embedded: AtomicUsize::new(0),
            fail_after: AtomicUsize::new(usize::MAX),
        }
    }

    fn fail_after(&self, texts: usize) {
        self.embedded.store(0, Ordering::SeqCst);
        self.fail_after.store(texts, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn provider_name(&self) -> &str {
        "keyword"
    }

    fn model_name(&self) -> &str {
        "keyword-v1"
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len() + 1
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if self.embedded.load(Ordering::SeqCst) >= self.fail_after.load(Ordering::SeqCst) {
            return Err(AppError::embedding(
                EmbeddingErrorKind::Auth,
                "credentials revoked",
            ));
        }
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);

        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; KEYWORDS.len() + 1];
                let axis = KEYWORDS
                    .iter()
                    .position(|k| text.contains(k))
                    .unwrap_or(KEYWORDS.len());
                vector[axis] = 1.0;
                vector
            })
            .collect())
    }
}

struct Library {
    temp: TempDir,
    provider: Arc<KeywordProvider>,
    manager: Arc<IndexLifecycleManager>,
    service: Arc<RetrievalService>,
}

impl Library {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(KeywordProvider::new());
        let embedder = Arc::new(EmbeddingClient::new(
            provider.clone(),
            1,
            Duration::from_secs(5),
            RetryPolicy::default(),
        ));
        let active = Arc::new(ActiveIndex::new());
        let cache = Arc::new(QueryCache::new(Duration::from_secs(300), 64));

        let settings = LifecycleSettings {
            index_path: temp.path().join("data/index.lbx"),
            backup_dir: temp.path().join("backups"),
            retention_days: 7,
        };
        // Each 60-character segment becomes exactly one chunk
        let store = ChunkStore::new(ChunkingPolicy::new(60, 0, 10), 1);
        let manager = IndexLifecycleManager::new(settings, store, embedder.clone(), active.clone())
            .with_cache(cache.clone());

        let retrieval = RetrievalSettings {
            focus: None,
            ..Default::default()
        };
        let service = RetrievalService::new(active, embedder, retrieval).with_cache(cache);

        Self {
            temp,
            provider,
            manager: Arc::new(manager),
            service: Arc::new(service),
        }
    }

    /// Write a book whose chunks are one keyword repeated, in order.
    fn write_book(&self, folder: &str, file: &str, keywords: &[&str]) -> PathBuf {
        let dir = self.temp.path().join(folder);
        fs::create_dir_all(&dir).unwrap();
        let text: String = keywords.iter().map(|k| format!("{} ", k).repeat(10)).collect();
        fs::write(dir.join(file), text).unwrap();
        dir
    }

    async fn ingest(&self, folder: &Path) -> AppResult<libris_index::IngestReport> {
        self.manager
            .ingest_and_promote(folder, &ProgressReporter::noop())
            .await
    }

    fn index_bytes(&self) -> Vec<u8> {
        fs::read(self.manager.index_path()).unwrap()
    }
}

fn file_names(result: &RetrievalResult) -> Vec<String> {
    result
        .chunks()
        .iter()
        .map(|r| r.chunk.file_name.clone())
        .collect()
}

#[tokio::test]
async fn test_ingest_then_retrieve_end_to_end() {
    let lib = Library::new();
    let books = lib.write_book("books", "nature.txt", &["whale", "tulip", "rover"]);

    let report = lib.ingest(&books).await.unwrap();
    assert_eq!(report.documents_count, 1);
    assert_eq!(report.chunks_count, 3);
    assert_eq!(lib.manager.state(), IndexState::Active);

    let result = lib.service.retrieve("where did the rover go", 1, 0.5).await;
    assert!(result.is_found());
    let hit = &result.chunks()[0];
    assert_eq!(hit.chunk.id, 2);
    assert!(hit.chunk.text.starts_with("rover"));
    assert!(hit.score >= 0.5);

    let result = lib.service.retrieve("stock market prices", 1, 0.95).await;
    assert_eq!(
        result,
        RetrievalResult::not_found(NotFoundReason::BelowThreshold)
    );
}

#[tokio::test]
async fn test_failed_ingestion_keeps_active_snapshot() {
    let lib = Library::new();
    let books = lib.write_book("books", "first.txt", &["whale", "tulip"]);
    lib.ingest(&books).await.unwrap();
    let before = lib.index_bytes();

    let next = lib.write_book("next", "second.txt", &["rover", "rover", "rover", "tulip"]);
    lib.provider.fail_after(2);
    let err = lib.ingest(&next).await.unwrap_err();

    assert!(matches!(
        err,
        AppError::EmbeddingService {
            kind: EmbeddingErrorKind::Auth,
            ..
        }
    ));
    assert_eq!(lib.index_bytes(), before);
    assert_eq!(lib.manager.state(), IndexState::Active);
    assert_eq!(lib.manager.active().generation(), 1);

    // Still serving the first library
    lib.provider.fail_after(usize::MAX);
    let result = lib.service.retrieve("a whale", 5, 0.5).await;
    assert_eq!(file_names(&result), vec!["first.txt"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queries_during_promotion_see_one_snapshot() {
    let lib = Library::new();
    let old = lib.write_book("old", "old.txt", &["whale", "whale"]);
    let new = lib.write_book("new", "new.txt", &["whale", "whale", "whale"]);
    lib.ingest(&old).await.unwrap();

    let manager = lib.manager.clone();
    let promotion = tokio::spawn(async move {
        manager
            .ingest_and_promote(&new, &ProgressReporter::noop())
            .await
    });

    let queries = (0..64).map(|i| {
        let service = lib.service.clone();
        tokio::spawn(async move {
            // Distinct text defeats the cache
            service.retrieve(&format!("whale {}", i), 10, 0.5).await
        })
    });
    let results = futures::future::join_all(queries).await;
    promotion.await.unwrap().unwrap();

    for result in results {
        let names = file_names(&result.unwrap());
        assert!(
            names == vec!["old.txt"; 2] || names == vec!["new.txt"; 3],
            "mixed result: {:?}",
            names
        );
    }

    let after = lib.service.retrieve("whale again", 10, 0.5).await;
    assert_eq!(file_names(&after), vec!["new.txt"; 3]);
}

#[tokio::test]
async fn test_promotion_invalidates_cached_answers() {
    let lib = Library::new();
    let first = lib.write_book("first", "a.txt", &["tulip"]);
    let second = lib.write_book("second", "b.txt", &["tulip"]);

    lib.ingest(&first).await.unwrap();
    let before = lib.service.retrieve("tulip", 1, 0.5).await;
    assert_eq!(file_names(&before), vec!["a.txt"]);

    lib.ingest(&second).await.unwrap();
    let after = lib.service.retrieve("tulip", 1, 0.5).await;
    assert_eq!(file_names(&after), vec!["b.txt"]);
}

#[tokio::test]
async fn test_restore_missing_backup_leaves_index_alone() {
    let lib = Library::new();
    let books = lib.write_book("books", "a.txt", &["whale"]);
    lib.ingest(&books).await.unwrap();
    let before = lib.index_bytes();

    let err = lib.manager.restore("19990101_000000").await.unwrap_err();

    assert!(matches!(err, AppError::BackupNotFound(_)));
    assert_eq!(lib.index_bytes(), before);
    assert_eq!(lib.manager.active().generation(), 1);
}

#[tokio::test]
async fn test_backup_then_restore_round_trip() {
    let lib = Library::new();
    let first = lib.write_book("first", "a.txt", &["whale", "tulip"]);
    let second = lib.write_book("second", "b.txt", &["rover"]);

    lib.ingest(&first).await.unwrap();
    let original = lib.index_bytes();
    let record = lib.manager.backup().await.unwrap();

    lib.ingest(&second).await.unwrap();
    assert_ne!(lib.index_bytes(), original);

    let restored = lib.manager.restore(&record.label()).await.unwrap();
    assert_eq!(restored.checksum, record.checksum);
    assert_eq!(lib.index_bytes(), original);

    let result = lib.service.retrieve("whale", 5, 0.5).await;
    assert_eq!(file_names(&result), vec!["a.txt"]);
    let result = lib.service.retrieve("rover", 5, 0.5).await;
    assert_eq!(
        result,
        RetrievalResult::not_found(NotFoundReason::BelowThreshold)
    );
}

#[tokio::test]
async fn test_prune_keeps_backups_within_horizon() {
    let lib = Library::new();
    let books = lib.write_book("books", "a.txt", &["whale"]);
    lib.ingest(&books).await.unwrap();

    let now = now_local();
    let backup_dir = lib.manager.backup_dir().to_path_buf();
    fs::create_dir_all(&backup_dir).unwrap();
    for days in [30, 10, 3, 1] {
        let path = backup::backup_path(&backup_dir, now - ChronoDuration::days(days), "lbx");
        fs::copy(lib.manager.index_path(), path).unwrap();
    }

    let removed = lib.manager.prune_backups(now).await.unwrap();
    assert_eq!(removed.len(), 2);

    let remaining = lib.manager.list_backups().unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .all(|r| r.timestamp >= now - ChronoDuration::days(7)));
}
