//! Logging infrastructure for Libris.
//!
//! Initializes the tracing subscriber. Console output goes to stderr so stdout
//! stays clean for query results; a daily log file is kept under the log
//! directory when one is given.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{AppError, AppResult};

/// Log files are named `libris.<date>.log`.
pub const LOG_FILE_PREFIX: &str = "libris";
const LOG_FILE_SUFFIX: &str = "log";

/// Initialize the tracing subscriber with stderr output and an optional
/// rolling log file in `log_dir`.
///
/// `log_level` accepts either the operator-facing names (`DEBUG`, `INFO`,
/// `WARNING`, `ERROR`) or any `EnvFilter` directive. When absent, `RUST_LOG`
/// is used, falling back to `info`.
///
/// # Example
/// ```no_run
/// use libris_core::logging::init_logging;
/// use std::path::Path;
///
/// init_logging(Some("INFO"), false, Some(Path::new("logs")))
///     .expect("Failed to initialize logging");
/// ```
pub fn init_logging(
    log_level: Option<&str>,
    no_color: bool,
    log_dir: Option<&Path>,
) -> AppResult<()> {
    let default_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_str = normalize_level(log_level.unwrap_or(&default_level));

    let env_filter = EnvFilter::try_new(&filter_str)
        .map_err(|e| AppError::Config(format!("Invalid log filter '{}': {}", filter_str, e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(!no_color && supports_color());

    let file_layer = match log_dir {
        Some(dir) => Some(
            fmt::layer()
                .with_writer(file_appender(dir)?)
                .with_target(true)
                .with_ansi(false),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to init logging: {}", e)))?;

    Ok(())
}

/// Daily-rotated log file writer under `dir`, created if missing.
pub fn file_appender(dir: &Path) -> AppResult<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(dir)
        .map_err(|e| AppError::Config(format!("Cannot open log file in {:?}: {}", dir, e)))
}

/// Map operator log level names onto tracing filter directives.
///
/// Anything that is not a bare level name is passed through untouched so
/// `RUST_LOG`-style directives keep working.
pub fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace".to_string(),
        "DEBUG" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARN" | "WARNING" => "warn".to_string(),
        "ERROR" | "CRITICAL" => "error".to_string(),
        _ => level.trim().to_string(),
    }
}

fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
}
