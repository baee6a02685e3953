//! Chunk store: turns a folder of books into an ordered chunk sequence.

use libris_core::config::ChunkingConfig;
use libris_core::{AppError, AppResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunker::{chunk_text, ChunkingPolicy};
use crate::parser::{self, ParseLimits, SourceFormat};
use crate::progress::ProgressReporter;
use crate::types::{Chunk, ChunkSet, SourceDocument, SourceFailure};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Reads books and splits them into chunks.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    policy: ChunkingPolicy,
    limits: ParseLimits,
}

impl ChunkStore {
    pub fn new(policy: ChunkingPolicy, max_file_size_mb: u64) -> Self {
        Self {
            policy,
            limits: ParseLimits::new(max_file_size_mb.saturating_mul(BYTES_PER_MB)),
        }
    }

    pub fn with_max_pdf_pages(mut self, max_pdf_pages: usize) -> Self {
        self.limits.max_pdf_pages = max_pdf_pages;
        self
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(ChunkingPolicy::from(config), config.max_file_size_mb)
            .with_max_pdf_pages(config.max_pdf_pages)
    }

    pub fn policy(&self) -> &ChunkingPolicy {
        &self.policy
    }

    /// List supported book files under `folder`, sorted by path.
    pub fn discover(&self, folder: &Path) -> AppResult<Vec<PathBuf>> {
        if !folder.exists() {
            return Err(AppError::Config(format!(
                "Books folder does not exist: {:?}",
                folder
            )));
        }
        if !folder.is_dir() {
            return Err(AppError::Config(format!(
                "Books folder is not a directory: {:?}",
                folder
            )));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(folder)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry under {:?}: {}", folder, e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| entry.into_path())
            .filter(|path| SourceFormat::from_path(path).is_some())
            .collect();

        files.sort();
        Ok(files)
    }

    /// Read every supported book under `folder` and chunk it.
    ///
    /// Chunk ids are assigned sequentially across the whole run. A book that
    /// cannot be read is logged and recorded in the failure list; the rest of
    /// the folder is still processed.
    pub fn ingest_folder(&self, folder: &Path, progress: &ProgressReporter) -> AppResult<ChunkSet> {
        let files = self.discover(folder)?;
        let total = files.len() as u64;
        progress.discover(total, &folder.display().to_string());

        tracing::info!("Found {} book files under {:?}", files.len(), folder);

        let mut set = ChunkSet::default();
        let mut next_id = 0u64;
        let mut taken_ids: HashSet<String> = HashSet::new();

        for (index, path) in files.iter().enumerate() {
            let file_name = relative_name(folder, path);
            progress.parse(index as u64 + 1, total, &file_name);

            let text = match parser::parse_file(path, &self.limits) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", file_name, e);
                    set.failures.push(SourceFailure {
                        path: path.clone(),
                        reason: failure_reason(e),
                    });
                    continue;
                }
            };

            let candidates = chunk_text(&text, &self.policy);
            if candidates.is_empty() {
                tracing::warn!("{} produced no chunks, skipping", file_name);
                continue;
            }

            let book_id = unique_book_id(&file_name, &mut taken_ids);
            let chunk_count = candidates.len() as u32;

            for candidate in candidates {
                set.chunks.push(Chunk {
                    id: next_id,
                    book_id: book_id.clone(),
                    file_name: file_name.clone(),
                    position: candidate.position,
                    start: candidate.start,
                    end: candidate.end,
                    text: candidate.text,
                    embedding: None,
                });
                next_id += 1;
            }

            set.documents.push(SourceDocument {
                book_id,
                file_name: file_name.clone(),
                path: path.clone(),
                format: SourceFormat::from_path(path).unwrap_or(SourceFormat::PlainText),
                size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
                chunk_count,
            });

            progress.chunk(index as u64 + 1, total, set.chunks.len());
            tracing::debug!("Chunked {}: {} chunks", file_name, chunk_count);
        }

        tracing::info!(
            "Chunked {} books into {} chunks ({} failed)",
            set.documents.len(),
            set.chunks.len(),
            set.failures.len()
        );

        Ok(set)
    }
}

/// Path relative to the books folder, with forward slashes.
fn relative_name(folder: &Path, path: &Path) -> String {
    path.strip_prefix(folder)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Book id: the relative file name without its extension.
fn book_id_for(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() && !stem.ends_with('/') => stem.to_string(),
        _ => file_name.to_string(),
    }
}

/// Book id that no other book in this run has.
///
/// `a.txt` next to `a.md` keeps the stem for whichever comes first; the other
/// falls back to its full relative name.
fn unique_book_id(file_name: &str, taken: &mut HashSet<String>) -> String {
    let mut id = book_id_for(file_name);
    if taken.contains(&id) {
        id = file_name.to_string();
    }

    let base = id.clone();
    let mut suffix = 2;
    while taken.contains(&id) {
        id = format!("{}~{}", base, suffix);
        suffix += 1;
    }

    taken.insert(id.clone());
    id
}

fn failure_reason(err: AppError) -> String {
    match err {
        AppError::SourceRead { reason, .. } => reason,
        other => other.to_string(),
    }
}
