//! Progress reporting for ingest-and-promote runs.
//!
//! Every event is traced; a callback, when installed, also receives it so a
//! terminal can show a live status line.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Stage of an ingestion run, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Discover,
    Parse,
    Chunk,
    Embed,
    Build,
    Promote,
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "discover",
            Self::Parse => "parse",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Build => "build",
            Self::Promote => "promote",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    /// Units done so far: files, texts or vectors depending on the phase
    pub current: u64,
    pub total: Option<u64>,
    pub detail: String,
    /// Seconds since the reporter was created
    pub elapsed_secs: f64,
}

impl ProgressEvent {
    /// Completion in percent, when the total is known.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some(self.current as f64 * 100.0 / total as f64),
            None => None,
        }
    }

    /// One status line, e.g. `[embed 40/100 40%] model=text-embedding-3-small`.
    pub fn status_line(&self) -> String {
        let counter = match (self.total, self.percent()) {
            (Some(total), Some(pct)) => format!("{}/{} {:.0}%", self.current, total, pct),
            _ => self.current.to_string(),
        };
        format!("[{} {}] {}", self.phase, counter, self.detail)
    }
}

/// Receives every progress event.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Cheap to clone; clones share the callback and start time.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    started: Instant,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            started: Instant::now(),
        }
    }

    /// Reporter that only traces.
    pub fn noop() -> Self {
        Self {
            callback: None,
            started: Instant::now(),
        }
    }

    fn report(&self, phase: ProgressPhase, current: u64, total: Option<u64>, detail: String) {
        let event = ProgressEvent {
            phase,
            current,
            total,
            detail,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        };

        tracing::debug!(
            phase = %event.phase,
            current = event.current,
            total = ?event.total,
            elapsed_secs = event.elapsed_secs,
            "{}",
            event.detail
        );

        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    pub fn discover(&self, found: u64, folder: &str) {
        self.report(
            ProgressPhase::Discover,
            found,
            Some(found),
            format!("{} books under {}", found, folder),
        );
    }

    pub fn parse(&self, current: u64, total: u64, file: &str) {
        self.report(ProgressPhase::Parse, current, Some(total), file.to_string());
    }

    pub fn chunk(&self, current: u64, total: u64, chunks_so_far: usize) {
        self.report(
            ProgressPhase::Chunk,
            current,
            Some(total),
            format!("{} chunks so far", chunks_so_far),
        );
    }

    pub fn embed(&self, embedded: u64, total: u64, model: &str) {
        self.report(
            ProgressPhase::Embed,
            embedded,
            Some(total),
            format!("model={}", model),
        );
    }

    pub fn build(&self, vectors: u64, dimensions: usize) {
        self.report(
            ProgressPhase::Build,
            vectors,
            Some(vectors),
            format!("{} x {} vector table", vectors, dimensions),
        );
    }

    pub fn promote(&self, generation: u64, path: &str) {
        self.report(
            ProgressPhase::Promote,
            1,
            Some(1),
            format!("generation {} live at {}", generation, path),
        );
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn capture() -> (ProgressReporter, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let reporter = ProgressReporter::new(Arc::new(move |event| sink.lock().push(event)));
        (reporter, events)
    }

    #[test]
    fn test_status_line() {
        let (reporter, events) = capture();
        reporter.embed(40, 100, "text-embedding-3-small");
        reporter.parse(0, 0, "empty.txt");

        let events = events.lock();
        assert_eq!(
            events[0].status_line(),
            "[embed 40/100 40%] model=text-embedding-3-small"
        );
        assert_eq!(events[1].percent(), Some(100.0));
    }

    #[test]
    fn test_phases_reach_callback_in_order() {
        let (reporter, events) = capture();
        reporter.discover(2, "books");
        reporter.parse(1, 2, "a.txt");
        reporter.chunk(1, 2, 7);
        reporter.build(7, 16);
        reporter.promote(3, "data/index.lbx");

        let phases: Vec<ProgressPhase> = events.lock().iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![
                ProgressPhase::Discover,
                ProgressPhase::Parse,
                ProgressPhase::Chunk,
                ProgressPhase::Build,
                ProgressPhase::Promote,
            ]
        );
    }

    #[test]
    fn test_clones_share_callback() {
        let (reporter, events) = capture();
        reporter.clone().promote(1, "x");
        assert_eq!(events.lock().len(), 1);
        ProgressReporter::default().promote(1, "x");
    }
}
