//! Libris CLI
//!
//! Main entry point for the libris command-line tool.
//! Builds, serves, backs up and restores a book library index.

mod commands;
mod context;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{
    BackupCommand, BackupsCommand, CatalogCommand, IngestCommand, PruneCommand, QueryCommand,
    RestoreCommand, RunCommand,
};
use libris_core::{config::AppConfig, logging};
use std::path::PathBuf;
use tracing::Instrument;

/// Libris - semantic search over a library of books
#[derive(Parser, Debug)]
#[command(name = "libris")]
#[command(about = "Semantic search over a library of books", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true, env = "LIBRIS_CONFIG")]
    config: Option<PathBuf>,

    /// Active index file
    #[arg(long, global = true)]
    index_path: Option<PathBuf>,

    /// Books folder
    #[arg(long, global = true)]
    books_dir: Option<PathBuf>,

    /// Backup directory
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    /// Embedding provider (openai, mock)
    #[arg(short, long, global = true)]
    provider: Option<String>,

    /// Log level (DEBUG, INFO, WARNING, ERROR)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a new index from the books folder and make it active
    Ingest(IngestCommand),

    /// Serve queries from stdin, with scheduled backups and re-ingestion
    Run(RunCommand),

    /// Retrieve the passages most relevant to a question
    Query(QueryCommand),

    /// Back up the active index
    Backup(BackupCommand),

    /// Restore the active index from a backup
    Restore(RestoreCommand),

    /// List backups
    Backups(BackupsCommand),

    /// Delete backups past the retention horizon
    Prune(PruneCommand),

    /// List the books in the active index
    Catalog(CatalogCommand),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Ingest(_) => "ingest",
            Self::Run(_) => "run",
            Self::Query(_) => "query",
            Self::Backup(_) => "backup",
            Self::Restore(_) => "restore",
            Self::Backups(_) => "backups",
            Self::Prune(_) => "prune",
            Self::Catalog(_) => "catalog",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Environment, with the config file from the command line if given
    let config_file = cli.config.clone();
    let config = AppConfig::load_from(|key| match (key, &config_file) {
        ("LIBRIS_CONFIG", Some(path)) => Some(path.display().to_string()),
        _ => std::env::var(key).ok(),
    })
    .context("Failed to load configuration")?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.index_path,
        cli.books_dir,
        cli.backup_dir,
        cli.provider,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    // Initialize logging with final configuration
    logging::init_logging(
        config.log_level.as_deref(),
        config.no_color,
        Some(&config.paths.log_dir),
    )
        .context("Failed to initialize logging")?;

    config.validate().context("Invalid configuration")?;

    tracing::info!("Libris starting");
    tracing::debug!("Active index: {:?}", config.paths.index_path);
    tracing::debug!("Books: {:?}", config.paths.books_dir);
    tracing::debug!(
        "Embedding: {} / {}",
        config.embedding.provider,
        config.embedding.model
    );

    config.ensure_dirs()?;

    let command_name = cli.command.name();
    let span = tracing::info_span!("command", name = command_name);

    // Route to command handlers
    let result = async {
        match cli.command {
            Commands::Ingest(cmd) => cmd.execute(&config).await,
            Commands::Run(cmd) => cmd.execute(&config).await,
            Commands::Query(cmd) => cmd.execute(&config).await,
            Commands::Backup(cmd) => cmd.execute(&config).await,
            Commands::Restore(cmd) => cmd.execute(&config).await,
            Commands::Backups(cmd) => cmd.execute(&config).await,
            Commands::Prune(cmd) => cmd.execute(&config).await,
            Commands::Catalog(cmd) => cmd.execute(&config).await,
        }
    }
    .instrument(span)
    .await;

    // Log completion
    match &result {
        Ok(()) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result.with_context(|| format!("libris {} failed", command_name))
}
