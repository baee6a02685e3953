//! Index lifecycle: ingestion, promotion, backup and restore.
//!
//! Promotion, backup, restore and pruning run one at a time under a single
//! async coordination token. Queries never take it: they read the
//! [`ActiveIndex`] handle, which is swapped only after the new snapshot file
//! has been renamed into place.

use chrono::{Local, NaiveDateTime, Timelike};
use libris_core::{AppConfig, AppError, AppResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

use crate::active::ActiveIndex;
use crate::backup;
use crate::cache::QueryCache;
use crate::embeddings::EmbeddingClient;
use crate::persistence;
use crate::progress::ProgressReporter;
use crate::store::ChunkStore;
use crate::types::{BackupRecord, IndexState, IngestReport};
use crate::vector_index::Snapshot;

/// Filesystem settings for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Active snapshot file
    pub index_path: PathBuf,
    /// Directory of timestamped backups
    pub backup_dir: PathBuf,
    /// Backups older than this are pruned
    pub retention_days: u32,
}

impl LifecycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            index_path: config.paths.index_path.clone(),
            backup_dir: config.paths.backup_dir.clone(),
            retention_days: config.backup.retention_days,
        }
    }

    fn extension(&self) -> String {
        self.index_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(libris_core::config::DEFAULT_INDEX_EXTENSION)
            .to_string()
    }
}

/// Orchestrates building, promoting, backing up and restoring snapshots.
#[derive(Debug)]
pub struct IndexLifecycleManager {
    settings: LifecycleSettings,
    extension: String,
    store: ChunkStore,
    embedder: Arc<EmbeddingClient>,
    active: Arc<ActiveIndex>,
    cache: Option<Arc<QueryCache>>,
    token: AsyncMutex<()>,
    state: Mutex<IndexState>,
}

impl IndexLifecycleManager {
    pub fn new(
        settings: LifecycleSettings,
        store: ChunkStore,
        embedder: Arc<EmbeddingClient>,
        active: Arc<ActiveIndex>,
    ) -> Self {
        let state = if active.is_empty() {
            IndexState::Empty
        } else {
            IndexState::Active
        };

        Self {
            extension: settings.extension(),
            settings,
            store,
            embedder,
            active,
            cache: None,
            token: AsyncMutex::new(()),
            state: Mutex::new(state),
        }
    }

    /// Clear `cache` whenever the served snapshot changes.
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn state(&self) -> IndexState {
        *self.state.lock()
    }

    pub fn active(&self) -> &Arc<ActiveIndex> {
        &self.active
    }

    pub fn index_path(&self) -> &Path {
        &self.settings.index_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.settings.backup_dir
    }

    /// Load the active snapshot file, if one exists, and start serving it.
    ///
    /// Returns `false` when there is nothing to load. A file that fails
    /// verification, holds no chunks or was built for a different embedding
    /// dimensionality is reported as [`AppError::CorruptIndex`] and nothing
    /// is served.
    pub async fn open(&self) -> AppResult<bool> {
        let _guard = self.token.lock().await;

        let path = self.settings.index_path.clone();
        if !path.exists() {
            tracing::info!("No active index at {:?}; starting empty", path);
            return Ok(false);
        }

        let expected_dimensions = self.embedder.dimensions();
        let snapshot = run_blocking(move || {
            let snapshot = persistence::load(&path)?;
            snapshot
                .validate(expected_dimensions)
                .map_err(|e| AppError::CorruptIndex(format!("{}: {}", path.display(), e)))?;
            Ok(snapshot)
        })
        .await?;

        let chunks = snapshot.len();
        let generation = self.swap(Arc::new(snapshot));
        tracing::info!(
            "Opened active index {:?}: {} chunks, generation {}",
            self.settings.index_path,
            chunks,
            generation
        );
        Ok(true)
    }

    /// Build a new snapshot from `folder` and make it the served one.
    ///
    /// If any stage fails the previous snapshot stays on disk and in service,
    /// and the state returns to what it was before the run.
    #[instrument(skip(self, folder, progress), fields(folder = %folder.display()))]
    pub async fn ingest_and_promote(
        &self,
        folder: &Path,
        progress: &ProgressReporter,
    ) -> AppResult<IngestReport> {
        let _guard = self.token.lock().await;

        let previous = self.set_state(IndexState::Building);
        match self.build_and_promote(folder, progress).await {
            Ok(report) => {
                self.set_state(IndexState::Active);
                Ok(report)
            }
            Err(e) => {
                self.set_state(previous);
                tracing::error!("Ingestion failed, active index unchanged: {}", e);
                Err(e)
            }
        }
    }

    async fn build_and_promote(
        &self,
        folder: &Path,
        progress: &ProgressReporter,
    ) -> AppResult<IngestReport> {
        let start = Instant::now();
        let stats_before = self.embedder.stats();

        let store = self.store.clone();
        let folder_owned = folder.to_path_buf();
        let reporter = progress.clone();
        let set = run_blocking(move || store.ingest_folder(&folder_owned, &reporter)).await?;

        if set.is_empty() {
            return Err(AppError::Knowledge(format!(
                "No chunks produced from {:?} ({} files failed)",
                folder,
                set.failures.len()
            )));
        }

        let documents_count = set.documents.len() as u32;
        let bytes_processed = set.total_bytes();
        let failures = set.failures;
        let mut chunks = set.chunks;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_with_progress(&texts, progress).await?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }

        let snapshot = Snapshot::build(chunks, self.embedder.model_name())?;
        snapshot.validate(self.embedder.dimensions())?;
        progress.build(snapshot.len() as u64, snapshot.dimensions());

        let snapshot = Arc::new(snapshot);
        let to_save = snapshot.clone();
        let path = self.settings.index_path.clone();
        run_blocking(move || persistence::save(&to_save, &path)).await?;

        let chunks_count = snapshot.len() as u32;
        let dimensions = snapshot.dimensions();
        let generation = self.swap(snapshot);
        progress.promote(generation, &self.settings.index_path.display().to_string());

        let stats_after = self.embedder.stats();
        let report = IngestReport {
            documents_count,
            chunks_count,
            bytes_processed,
            failures,
            embedding_calls: stats_after.calls - stats_before.calls,
            estimated_tokens: stats_after.estimated_tokens - stats_before.estimated_tokens,
            model: self.embedder.model_name().to_string(),
            dimensions,
            generation,
            duration_secs: start.elapsed().as_secs_f64(),
        };

        tracing::info!(
            "Promoted generation {}: {} books, {} chunks in {:.2}s",
            report.generation,
            report.documents_count,
            report.chunks_count,
            report.duration_secs
        );

        Ok(report)
    }

    /// Copy the active snapshot file into the backup directory, then prune.
    pub async fn backup(&self) -> AppResult<BackupRecord> {
        let _guard = self.token.lock().await;

        let source = self.settings.index_path.clone();
        if !source.exists() {
            return Err(AppError::Knowledge(format!(
                "No active index at {:?} to back up",
                source
            )));
        }

        let now = now_local();
        let dest = backup::backup_path(&self.settings.backup_dir, now, &self.extension);
        let target = dest.clone();
        run_blocking(move || persistence::copy_atomic(&source, &target).map(|_| ())).await?;

        let record = backup::record_for(&dest, now)?;
        tracing::info!("Created backup {:?}", record.path);

        let removed = backup::prune_backups(
            &self.settings.backup_dir,
            &self.extension,
            self.settings.retention_days,
            now,
        )?;
        if !removed.is_empty() {
            tracing::info!("Pruned {} expired backups", removed.len());
        }

        Ok(record)
    }

    /// Replace the active snapshot with the backup taken at `label`
    /// (`YYYYMMDD_HHMMSS`).
    ///
    /// The backup is verified before anything is touched; a missing or
    /// corrupt backup leaves the active snapshot as it was.
    pub async fn restore(&self, label: &str) -> AppResult<BackupRecord> {
        let timestamp = backup::parse_label(label)?;
        let source = backup::backup_path(&self.settings.backup_dir, timestamp, &self.extension);

        let _guard = self.token.lock().await;

        if !source.exists() {
            return Err(AppError::BackupNotFound(label.trim().to_string()));
        }

        let record = backup::record_for(&source, timestamp)?;
        let expected_dimensions = self.embedder.dimensions();
        let target = self.settings.index_path.clone();
        let snapshot = run_blocking(move || {
            let bytes = std::fs::read(&source)?;
            let snapshot = persistence::decode(&bytes).map_err(|e| match e {
                AppError::CorruptIndex(reason) => {
                    AppError::CorruptIndex(format!("{}: {}", source.display(), reason))
                }
                other => other,
            })?;
            snapshot
                .validate(expected_dimensions)
                .map_err(|e| AppError::CorruptIndex(format!("{}: {}", source.display(), e)))?;
            persistence::write_atomic(&target, &bytes)?;
            Ok(snapshot)
        })
        .await?;

        let generation = self.swap(Arc::new(snapshot));
        self.set_state(IndexState::Active);
        tracing::info!(
            "Restored backup {} as generation {}",
            record.label(),
            generation
        );

        Ok(record)
    }

    /// All backups, oldest first.
    pub fn list_backups(&self) -> AppResult<Vec<BackupRecord>> {
        backup::list_backups(&self.settings.backup_dir, &self.extension)
    }

    /// Delete backups older than the retention horizon measured from `now`.
    pub async fn prune_backups(&self, now: NaiveDateTime) -> AppResult<Vec<BackupRecord>> {
        let _guard = self.token.lock().await;
        backup::prune_backups(
            &self.settings.backup_dir,
            &self.extension,
            self.settings.retention_days,
            now,
        )
    }

    fn swap(&self, snapshot: Arc<Snapshot>) -> u64 {
        let generation = self.active.swap(snapshot);
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        *self.state.lock() = IndexState::Active;
        generation
    }

    fn set_state(&self, next: IndexState) -> IndexState {
        std::mem::replace(&mut *self.state.lock(), next)
    }
}

/// Current local time, truncated to whole seconds.
pub fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

async fn run_blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Other(format!("Blocking task failed: {}", e)))?
}
