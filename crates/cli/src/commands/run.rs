//! Run command handler: the long-running serving path.
//!
//! Reads one query per line from stdin and writes one JSON answer per line
//! to stdout. Queries are answered concurrently, so answers carry the line
//! id and query text. Scheduled backups and re-ingestion run alongside on
//! their own tasks and never block queries.

use clap::Args;
use futures::{future, StreamExt};
use libris_core::{config::AppConfig, AppResult};
use libris_index::{IndexLifecycleManager, ProgressReporter, RetrievalService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use crate::context::Library;

/// Serve queries from stdin as JSON lines
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Books folder for scheduled re-ingestion (defaults to BOOKS_DIR)
    #[arg(long)]
    pub folder: Option<PathBuf>,

    /// Ingest the books folder in the background at startup
    #[arg(long)]
    pub ingest_on_start: bool,

    /// Seconds between scheduled backups (0 disables)
    #[arg(long, env = "BACKUP_INTERVAL_SECS", default_value = "0")]
    pub backup_interval_secs: u64,

    /// Seconds between scheduled re-ingestions (0 disables)
    #[arg(long, env = "REINGEST_INTERVAL_SECS", default_value = "0")]
    pub reingest_interval_secs: u64,

    /// Queries answered at the same time
    #[arg(long, default_value = "8")]
    pub concurrency: usize,
}

impl RunCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let library = Library::open(config).await?;
        library.embedder.health_check().await?;

        let folder = self
            .folder
            .clone()
            .unwrap_or_else(|| config.paths.books_dir.clone());

        let mut jobs: Vec<JoinHandle<()>> = Vec::new();
        if self.ingest_on_start {
            jobs.push(tokio::spawn(ingest_once(
                library.manager.clone(),
                folder.clone(),
            )));
        }
        if self.backup_interval_secs > 0 {
            jobs.push(tokio::spawn(backup_loop(
                library.manager.clone(),
                Duration::from_secs(self.backup_interval_secs),
            )));
        }
        if self.reingest_interval_secs > 0 {
            jobs.push(tokio::spawn(reingest_loop(
                library.manager.clone(),
                folder,
                Duration::from_secs(self.reingest_interval_secs),
            )));
        }

        tracing::info!(
            "Serving queries from stdin (state: {}, concurrency: {})",
            library.manager.state(),
            self.concurrency
        );

        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let result = tokio::select! {
            result = answer_lines(stdin, &mut stdout, library.retrieval.clone(), self.concurrency) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                Ok(0)
            }
        };

        for job in jobs {
            job.abort();
        }

        let answered = result?;
        tracing::info!("Answered {} queries", answered);
        Ok(())
    }
}

/// Answer every non-blank line of `reader`, writing one JSON line per query.
///
/// Returns the number of queries answered.
pub(crate) async fn answer_lines<R, W>(
    reader: R,
    writer: &mut W,
    retrieval: Arc<RetrievalService>,
    concurrency: usize,
) -> AppResult<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let lines = futures::stream::unfold(reader.lines(), |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((line, lines)),
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Failed to read query: {}", e);
                None
            }
        }
    });

    let answers = lines
        .filter(|line| future::ready(!line.trim().is_empty()))
        .enumerate()
        .map(|(id, query)| {
            let retrieval = retrieval.clone();
            async move {
                let result = retrieval.retrieve_default(&query).await;
                serde_json::json!({ "id": id, "query": query, "result": result })
            }
        })
        .buffer_unordered(concurrency.max(1));
    let mut answers = std::pin::pin!(answers);

    let mut answered = 0u64;
    while let Some(answer) = answers.next().await {
        let mut line = serde_json::to_string(&answer)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        answered += 1;
    }
    Ok(answered)
}

async fn ingest_once(manager: Arc<IndexLifecycleManager>, folder: PathBuf) {
    match manager
        .ingest_and_promote(&folder, &ProgressReporter::noop())
        .await
    {
        Ok(report) => tracing::info!(
            "Background ingestion promoted generation {} ({} chunks)",
            report.generation,
            report.chunks_count
        ),
        Err(e) => tracing::warn!("Background ingestion failed: {}", e),
    }
}

async fn backup_loop(manager: Arc<IndexLifecycleManager>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match manager.backup().await {
            Ok(record) => tracing::info!("Scheduled backup {} created", record.label()),
            Err(e) => tracing::warn!("Scheduled backup failed: {}", e),
        }
    }
}

async fn reingest_loop(manager: Arc<IndexLifecycleManager>, folder: PathBuf, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        ingest_once(manager.clone(), folder.clone()).await;
    }
}
