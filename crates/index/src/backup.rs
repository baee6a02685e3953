//! Backup file naming, listing and retention.
//!
//! Backups live flat in one directory as `index_<YYYYMMDD_HHMMSS>.<ext>`,
//! where the timestamp is local time at creation.

use chrono::{Duration, NaiveDateTime};
use libris_core::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};

use crate::persistence;
use crate::types::BackupRecord;

/// Timestamp format used in backup file names and restore labels.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const FILE_PREFIX: &str = "index_";

pub fn backup_file_name(timestamp: NaiveDateTime, extension: &str) -> String {
    format!(
        "{}{}.{}",
        FILE_PREFIX,
        timestamp.format(TIMESTAMP_FORMAT),
        extension
    )
}

pub fn backup_path(dir: &Path, timestamp: NaiveDateTime, extension: &str) -> PathBuf {
    dir.join(backup_file_name(timestamp, extension))
}

/// Parse a `YYYYMMDD_HHMMSS` label.
pub fn parse_label(label: &str) -> AppResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(label.trim(), TIMESTAMP_FORMAT).map_err(|_| {
        AppError::BackupNotFound(format!(
            "'{}' is not a backup timestamp (expected YYYYMMDD_HHMMSS)",
            label
        ))
    })
}

/// Extract the timestamp from a backup file name, if it is one.
pub fn parse_backup_name(file_name: &str, extension: &str) -> Option<NaiveDateTime> {
    let stem = file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(extension)?
        .strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT).ok()
}

/// Describe an existing backup file.
pub fn record_for(path: &Path, timestamp: NaiveDateTime) -> AppResult<BackupRecord> {
    let size_bytes = fs::metadata(path)?.len();
    let checksum = persistence::stored_checksum(path)?;
    Ok(BackupRecord {
        timestamp,
        path: path.to_path_buf(),
        checksum,
        size_bytes,
    })
}

/// All backups in `dir`, oldest first. A missing directory has no backups.
pub fn list_backups(dir: &Path, extension: &str) -> AppResult<Vec<BackupRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(timestamp) = parse_backup_name(&name, extension) else {
            continue;
        };

        match record_for(&entry.path(), timestamp) {
            Ok(record) => records.push(record),
            Err(e) => {
                // Still listed so that retention can clean it up
                tracing::warn!("Backup {} is unreadable: {}", name, e);
                records.push(BackupRecord {
                    timestamp,
                    path: entry.path(),
                    checksum: String::new(),
                    size_bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
                });
            }
        }
    }

    records.sort_by_key(|r| r.timestamp);
    Ok(records)
}

/// Delete backups strictly older than `now - retention_days`.
///
/// Returns the removed records.
pub fn prune_backups(
    dir: &Path,
    extension: &str,
    retention_days: u32,
    now: NaiveDateTime,
) -> AppResult<Vec<BackupRecord>> {
    let horizon = now - Duration::days(i64::from(retention_days));
    let mut removed = Vec::new();

    for record in list_backups(dir, extension)? {
        if record.timestamp >= horizon {
            continue;
        }
        match fs::remove_file(&record.path) {
            Ok(()) => {
                tracing::info!("Pruned backup {:?}", record.path);
                removed.push(record);
            }
            Err(e) => tracing::warn!("Failed to prune backup {:?}: {}", record.path, e),
        }
    }

    Ok(removed)
}
