//! Error types for Libris.
//!
//! This module defines a unified error enum that covers configuration, I/O,
//! document parsing, the embedding service, index integrity and backups.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for Libris.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A source document could not be read or parsed
    #[error("Failed to read source {path:?}: {reason}")]
    SourceRead { path: PathBuf, reason: String },

    /// The external embedding service failed
    #[error("Embedding service error ({kind}): {message}")]
    EmbeddingService {
        kind: EmbeddingErrorKind,
        message: String,
    },

    /// A snapshot file failed validation
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// The requested backup does not exist
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// Index building, promotion and retrieval errors
    #[error("Index error: {0}")]
    Knowledge(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Classification of embedding service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingErrorKind {
    /// The call did not complete within its deadline
    Timeout,
    /// Quota or rate limit exhausted (HTTP 429)
    RateLimited,
    /// Connection failure or server-side error (5xx)
    Unavailable,
    /// Credentials missing or rejected
    Auth,
    /// The response could not be used (bad JSON, wrong count or dimensions)
    Malformed,
}

impl EmbeddingErrorKind {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::Unavailable)
    }
}

impl fmt::Display for EmbeddingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::Unavailable => "unavailable",
            Self::Auth => "auth",
            Self::Malformed => "malformed",
        };
        f.write_str(name)
    }
}

impl AppError {
    /// Shorthand for building an embedding service error.
    pub fn embedding(kind: EmbeddingErrorKind, message: impl Into<String>) -> Self {
        AppError::EmbeddingService {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for building a source read error.
    pub fn source_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AppError::SourceRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for embedding failures that are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::EmbeddingService { kind, .. } => kind.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
