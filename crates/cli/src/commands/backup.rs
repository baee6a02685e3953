//! Backup, restore, listing and retention commands.

use clap::Args;
use libris_core::{config::AppConfig, AppResult};
use libris_index::lifecycle::now_local;
use libris_index::BackupRecord;

use crate::context::Library;

/// Copy the active index into the backup directory, then prune old backups
#[derive(Args, Debug)]
pub struct BackupCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl BackupCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing backup command");

        let library = Library::open(config).await?;
        let record = library.manager.backup().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            println!("Created backup {} at {}", record.label(), record.path.display());
        }
        Ok(())
    }
}

/// Replace the active index with a backup
#[derive(Args, Debug)]
pub struct RestoreCommand {
    /// Backup timestamp (YYYYMMDD_HHMMSS), as shown by `libris backups`
    pub timestamp: String,
}

impl RestoreCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing restore command for {}", self.timestamp);

        let library = Library::open(config).await?;
        let record = library.manager.restore(&self.timestamp).await?;

        println!(
            "Restored backup {} ({}) to {}",
            record.label(),
            short_checksum(&record.checksum),
            library.manager.index_path().display()
        );
        Ok(())
    }
}

/// List available backups, oldest first
#[derive(Args, Debug)]
pub struct BackupsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl BackupsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let library = Library::open(config).await?;
        let records = library.manager.list_backups()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        if records.is_empty() {
            println!("No backups in {}", library.manager.backup_dir().display());
            return Ok(());
        }

        for record in &records {
            println!("{}", format_record(record));
        }
        Ok(())
    }
}

/// Delete backups older than the retention horizon
#[derive(Args, Debug)]
pub struct PruneCommand {}

impl PruneCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(
            "Executing prune command (retention {} days)",
            config.backup.retention_days
        );

        let library = Library::open(config).await?;
        let removed = library.manager.prune_backups(now_local()).await?;

        println!(
            "Removed {} backups older than {} days",
            removed.len(),
            config.backup.retention_days
        );
        for record in &removed {
            println!("  {}", record.label());
        }
        Ok(())
    }
}

fn short_checksum(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}

fn format_record(record: &BackupRecord) -> String {
    let checksum = if record.checksum.is_empty() {
        "unreadable"
    } else {
        short_checksum(&record.checksum)
    };
    format!(
        "{}  {:>10} bytes  {}  {}",
        record.label(),
        record.size_bytes,
        checksum,
        record.path.display()
    )
}
