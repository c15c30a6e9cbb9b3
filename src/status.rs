//! Shared, pollable execution state.
//!
//! The scan worker is the only writer; any number of reporting threads may
//! call [`ScanStatus::snapshot`] concurrently. The inner lock is held just
//! long enough to copy scalars and small maps, so polling never stalls the
//! scan for more than a snapshot copy.

use crate::settings::ScanSettings;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Final accounting for one finished source file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub source: PathBuf,
    pub counts: BTreeMap<String, u64>,
    pub found: u64,
    pub elapsed: Duration,
    pub write_errors: Vec<String>,
}

/// Point-in-time copy of the execution state, safe to hand to any
/// reporting surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub current_file: Option<PathBuf>,
    pub source_files_total: usize,
    pub source_files_finished: usize,
    pub file_start: Option<u64>,
    pub file_end: Option<u64>,
    pub current_size: u64,
    pub current_progress: u64,
    pub current_counts: BTreeMap<String, u64>,
    pub total_counts: BTreeMap<String, u64>,
    pub found_overall: u64,
    pub current_elapsed: Option<Duration>,
    pub completed: Vec<FileResult>,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct StatusInner {
    finished: usize,
    found_overall: u64,
    file_start: Option<u64>,
    file_end: Option<u64>,
    size: u64,
    progress: u64,
    current_counts: BTreeMap<String, u64>,
    total_counts: BTreeMap<String, u64>,
    start_times: Vec<Instant>,
    run_times: Vec<Duration>,
    found_per_file: Vec<u64>,
    completed: Vec<FileResult>,
    write_errors: Vec<String>,
}

/// Mutable record of one execution, owned by the scan engine while a file
/// is being scanned and readable by pollers at any time. Created once per
/// multi-file execution; per-file state is reset as each source file is
/// finalized.
#[derive(Debug)]
pub struct ScanStatus {
    settings: ScanSettings,
    inner: Mutex<StatusInner>,
    cancel: AtomicBool,
}

impl ScanStatus {
    pub fn new(settings: ScanSettings) -> Self {
        let mut total_counts = BTreeMap::new();
        for sig in &settings.signatures {
            if !settings.disabled_signatures.contains(&sig.name) {
                total_counts.insert(sig.name.clone(), 0);
            }
        }
        Self {
            settings,
            inner: Mutex::new(StatusInner {
                total_counts,
                ..StatusInner::default()
            }),
            cancel: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Restricts the next scan to `[start, end)` of the source file.
    /// Unset bounds default to the whole file at `init` time.
    pub fn set_scan_window(&self, start: Option<u64>, end: Option<u64>) {
        let mut inner = self.inner.lock();
        inner.file_start = start;
        inner.file_end = end;
    }

    /// Asks the scan worker to wind down at the next byte boundary.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_more_source_files(&self) -> bool {
        self.inner.lock().finished < self.settings.source_count()
    }

    /// Processing time for an already-finished source file.
    #[must_use]
    pub fn run_time_for(&self, index: usize) -> Option<Duration> {
        self.inner.lock().run_times.get(index).copied()
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock();
        let current_elapsed = if inner.start_times.len() > inner.run_times.len() {
            inner.start_times.last().map(Instant::elapsed)
        } else {
            None
        };
        StatusSnapshot {
            current_file: self.settings.source_files.get(inner.finished).cloned(),
            source_files_total: self.settings.source_count(),
            source_files_finished: inner.finished,
            file_start: inner.file_start,
            file_end: inner.file_end,
            current_size: inner.size,
            current_progress: inner.progress,
            current_counts: inner.current_counts.clone(),
            total_counts: inner.total_counts.clone(),
            found_overall: inner.found_overall,
            current_elapsed,
            completed: inner.completed.clone(),
            cancelled: self.is_cancelled(),
        }
    }

    pub(crate) fn current_file(&self) -> (usize, Option<PathBuf>) {
        let index = self.inner.lock().finished;
        (index, self.settings.source_files.get(index).cloned())
    }

    /// Resolves the scan window against the actual file size and stores the
    /// effective bounds. Unset start defaults to 0; unset or oversized end
    /// defaults to the file size.
    pub(crate) fn resolve_window(&self, file_size: u64) -> (u64, u64) {
        let mut inner = self.inner.lock();
        let start = inner.file_start.unwrap_or(0).min(file_size);
        let end = match inner.file_end {
            Some(end) if end <= file_size => end,
            _ => file_size,
        };
        inner.file_start = Some(start);
        inner.file_end = Some(end);
        (start, end)
    }

    pub(crate) fn reset_file_counters(&self, names: &[String]) {
        let mut inner = self.inner.lock();
        inner.current_counts.clear();
        for name in names {
            inner.current_counts.insert(name.clone(), 0);
        }
        inner.write_errors.clear();
    }

    pub(crate) fn started_one_source_file(&self, size: u64) {
        let mut inner = self.inner.lock();
        inner.size = size;
        inner.progress = 0;
        inner.found_per_file.push(0);
        inner.start_times.push(Instant::now());
    }

    pub(crate) fn update_progress(&self, bytes: u64) {
        self.inner.lock().progress = bytes;
    }

    pub(crate) fn found_file(&self, name: &str) {
        let mut inner = self.inner.lock();
        *inner.current_counts.entry(name.to_string()).or_insert(0) += 1;
        *inner.total_counts.entry(name.to_string()).or_insert(0) += 1;
        if let Some(sum) = inner.found_per_file.last_mut() {
            *sum += 1;
        }
        inner.found_overall += 1;
    }

    /// Cumulative found count for one signature, the basis of the running
    /// output-filename counter.
    pub(crate) fn total_count(&self, name: &str) -> u64 {
        self.inner.lock().total_counts.get(name).copied().unwrap_or(0)
    }

    pub(crate) fn record_write_error(&self, message: String) {
        self.inner.lock().write_errors.push(message);
    }

    /// Advances past the current source file without scanning it, recording
    /// an empty result so the history stays aligned with the source list.
    /// For callers that continue the run after a source open failure.
    pub fn skip_source_file(&self) {
        let mut inner = self.inner.lock();
        let source = self
            .settings
            .source_files
            .get(inner.finished)
            .cloned()
            .unwrap_or_default();
        inner.run_times.push(Duration::ZERO);
        inner.completed.push(FileResult {
            source,
            counts: BTreeMap::new(),
            found: 0,
            elapsed: Duration::ZERO,
            write_errors: Vec::new(),
        });
        inner.current_counts.clear();
        inner.file_start = None;
        inner.file_end = None;
        inner.finished += 1;
    }

    pub(crate) fn finished_one_source_file(&self) {
        let mut inner = self.inner.lock();
        inner.progress = inner.size;
        let elapsed = inner
            .start_times
            .last()
            .map(Instant::elapsed)
            .unwrap_or_default();
        inner.run_times.push(elapsed);

        let source = self
            .settings
            .source_files
            .get(inner.finished)
            .cloned()
            .unwrap_or_default();
        let counts = std::mem::take(&mut inner.current_counts);
        let found = inner.found_per_file.last().copied().unwrap_or(0);
        let write_errors = std::mem::take(&mut inner.write_errors);
        inner.completed.push(FileResult {
            source,
            counts,
            found,
            elapsed,
            write_errors,
        });

        inner.file_start = None;
        inner.file_end = None;
        inner.finished += 1;
    }
}
