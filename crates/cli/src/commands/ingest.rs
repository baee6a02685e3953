//! Ingest command handler.
//!
//! Rebuilds the index from the books folder and promotes it.

use clap::Args;
use libris_core::{config::AppConfig, AppResult};
use libris_index::{IngestReport, ProgressEvent, ProgressReporter};
use std::path::PathBuf;
use std::sync::Arc;

use crate::context::Library;

/// Build a new index from a folder of books and make it active
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// Books folder (defaults to BOOKS_DIR)
    #[arg(long)]
    pub folder: Option<PathBuf>,

    /// Suppress progress lines on stderr
    #[arg(short, long)]
    pub quiet: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let folder = self
            .folder
            .clone()
            .unwrap_or_else(|| config.paths.books_dir.clone());
        tracing::info!("Executing ingest command for {:?}", folder);

        let library = Library::open(config).await?;
        library.embedder.health_check().await?;

        let progress = if self.quiet {
            ProgressReporter::noop()
        } else {
            ProgressReporter::new(Arc::new(|event: ProgressEvent| {
                eprintln!("{}", event.status_line());
            }))
        };

        let report = library.manager.ingest_and_promote(&folder, &progress).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        Ok(())
    }
}

fn print_report(report: &IngestReport) {
    println!(
        "Indexed {} books ({} chunks, {} bytes) in {:.2}s",
        report.documents_count, report.chunks_count, report.bytes_processed, report.duration_secs
    );
    println!(
        "Model {} ({} dimensions), {} embedding calls, ~{} tokens, generation {}",
        report.model,
        report.dimensions,
        report.embedding_calls,
        report.estimated_tokens,
        report.generation
    );

    if !report.failures.is_empty() {
        println!("\nSkipped {} files:", report.failures.len());
        for failure in &report.failures {
            println!("  {}: {}", failure.path.display(), failure.reason);
        }
    }
}
