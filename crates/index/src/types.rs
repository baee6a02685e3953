//! Index type definitions.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::parser::SourceFormat;

/// A contiguous span of normalized text from one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Sequential identifier, unique within a snapshot
    pub id: u64,

    /// Book identifier derived from the file name
    pub book_id: String,

    /// Source file name (relative to the books folder)
    pub file_name: String,

    /// Position of this chunk within its book
    pub position: u32,

    /// Character offset of the first character
    pub start: usize,

    /// Character offset one past the last character
    pub end: usize,

    /// Text content
    pub text: String,

    /// Embedding vector, set once computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Chunk produced by the chunker before it is assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCandidate {
    pub position: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A book discovered during ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub book_id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub format: SourceFormat,
    pub size_bytes: u64,
    pub chunk_count: u32,
}

/// A document that could not be ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Output of one pass over the books folder.
#[derive(Debug, Clone, Default)]
pub struct ChunkSet {
    /// All chunks, ids assigned in ingestion order
    pub chunks: Vec<Chunk>,

    /// Documents that produced at least one chunk
    pub documents: Vec<SourceDocument>,

    /// Documents that were skipped with an error
    pub failures: Vec<SourceFailure>,
}

impl ChunkSet {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.documents.iter().map(|d| d.size_bytes).sum()
    }
}

/// Statistics from an ingest-and-promote run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// Number of books indexed
    pub documents_count: u32,

    /// Number of chunks in the new snapshot
    pub chunks_count: u32,

    /// Total bytes of indexed books
    pub bytes_processed: u64,

    /// Documents skipped with an error
    pub failures: Vec<SourceFailure>,

    /// Embedding service calls made
    pub embedding_calls: u64,

    /// Rough token estimate sent to the embedding service
    pub estimated_tokens: u64,

    /// Embedding model recorded in the snapshot
    pub model: String,

    /// Vector dimensionality
    pub dimensions: usize,

    /// Active generation after promotion
    pub generation: u64,

    /// Duration in seconds
    pub duration_secs: f64,
}

/// A chunk with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
}

/// Why a retrieval returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    /// The query was blank
    EmptyQuery,
    /// No snapshot has been promoted yet
    NoActiveIndex,
    /// No chunk met the relevance threshold
    BelowThreshold,
    /// Embedding the query exceeded its deadline
    EmbeddingTimeout,
    /// The embedding service failed
    EmbeddingFailed,
    /// The served snapshot cannot answer vectors from the current embedder
    IncompatibleIndex,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::EmptyQuery => "empty query",
            Self::NoActiveIndex => "no active index",
            Self::BelowThreshold => "no chunk met the relevance threshold",
            Self::EmbeddingTimeout => "query embedding timed out",
            Self::EmbeddingFailed => "embedding service failed",
            Self::IncompatibleIndex => "index does not match the embedding model",
        };
        f.write_str(text)
    }
}

/// Result of a retrieval, handed to the answer generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrievalResult {
    /// Ranked chunks, best first
    Found { chunks: Vec<ScoredChunk> },
    /// Nothing relevant
    NotFound { reason: NotFoundReason },
}

impl RetrievalResult {
    pub fn not_found(reason: NotFoundReason) -> Self {
        Self::NotFound { reason }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    /// Ranked chunks, empty when nothing was found.
    pub fn chunks(&self) -> &[ScoredChunk] {
        match self {
            Self::Found { chunks } => chunks,
            Self::NotFound { .. } => &[],
        }
    }
}

/// A timestamped copy of a snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Local time encoded in the file name
    pub timestamp: NaiveDateTime,

    /// Backup file location
    pub path: PathBuf,

    /// SHA-256 of the snapshot contents (hex)
    pub checksum: String,

    pub size_bytes: u64,
}

impl BackupRecord {
    /// Timestamp label accepted by `restore`.
    pub fn label(&self) -> String {
        self.timestamp.format(crate::backup::TIMESTAMP_FORMAT).to_string()
    }
}

/// Lifecycle state of the served index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Nothing has been promoted yet
    Empty,
    /// A new snapshot is being built; the previous one (if any) keeps serving
    Building,
    /// A snapshot is being served
    Active,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::Building => f.write_str("building"),
            Self::Active => f.write_str("active"),
        }
    }
}

