//! Book library index lifecycle.
//!
//! Turns a folder of books into an immutable vector snapshot, serves
//! similarity queries against the active snapshot, and manages promotion,
//! backups and restores without interrupting queries.

pub mod active;
pub mod backup;
pub mod cache;
pub mod catalog;
pub mod chunker;
pub mod embeddings;
pub mod lifecycle;
pub mod parser;
pub mod persistence;
pub mod progress;
pub mod retrieval;
pub mod store;
pub mod types;
pub mod vector_index;

pub use active::ActiveIndex;
pub use cache::{CacheKey, QueryCache};
pub use catalog::{Catalog, CatalogEntry};
pub use chunker::ChunkingPolicy;
pub use embeddings::{create_provider, EmbeddingClient, EmbeddingProvider, RetryPolicy};
pub use lifecycle::{IndexLifecycleManager, LifecycleSettings};
pub use progress::{ProgressCallback, ProgressEvent, ProgressPhase, ProgressReporter};
pub use retrieval::{FocusFilter, RetrievalService, RetrievalSettings};
pub use parser::{ParseLimits, SourceFormat};
pub use store::ChunkStore;
pub use types::{
    BackupRecord, Chunk, ChunkSet, IndexState, IngestReport, NotFoundReason, RetrievalResult,
    ScoredChunk, SourceDocument, SourceFailure,
};
pub use vector_index::Snapshot;
