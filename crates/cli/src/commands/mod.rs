//! Command handlers for the Libris CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod backup;
pub mod catalog;
pub mod ingest;
pub mod query;
pub mod run;

// Re-export command types for convenience
pub use backup::{BackupCommand, BackupsCommand, PruneCommand, RestoreCommand};
pub use catalog::CatalogCommand;
pub use ingest::IngestCommand;
pub use query::QueryCommand;
pub use run::RunCommand;
