//! The byte-by-byte scan state machine.
//!
//! One engine instance handles one source file per [`ScanEngine::init`] /
//! [`ScanEngine::scan`] pair; the caller iterates the pair over
//! `ScanSettings::source_files` and polls the shared [`ScanStatus`] from
//! its own thread. Scanning slides a window of the maximum pattern length
//! over the requested byte range one byte at a time, so total I/O stays
//! linear in the file size regardless of how many signatures are active.
//!
//! Known limitation: a file embedded inside another file of the *same*
//! type is not detected separately. While a signature has a pending start,
//! further start matches for it are ignored and the first non-skipped end
//! sequence closes the span from the outer start, so the inner file merges
//! into the outer carve. Nested files of *different* types are recovered
//! independently.

use crate::error::{CarveError, Result};
use crate::matching;
use crate::signature::{EndStrategy, Signature, disable, validate_and_normalize};
use crate::status::ScanStatus;
use crate::writer;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SignatureScratch {
    /// Offset of a matched start pattern awaiting its end sequence.
    pending_start: Option<u64>,
    /// End-sequence occurrences ignored so far for the pending candidate.
    skipped: u32,
}

/// Drives signature matching over one source file at a time.
pub struct ScanEngine {
    status: Arc<ScanStatus>,
    active: Vec<Signature>,
    scratch: Vec<SignatureScratch>,
    window_len: usize,
    source: Option<BufReader<File>>,
    source_path: PathBuf,
    file_start: u64,
    file_end: u64,
}

impl ScanEngine {
    pub fn new(status: Arc<ScanStatus>) -> Self {
        Self {
            status,
            active: Vec::new(),
            scratch: Vec::new(),
            window_len: 1,
            source: None,
            source_path: PathBuf::new(),
            file_start: 0,
            file_end: 0,
        }
    }

    /// Prepares the engine for the next source file: validates the
    /// signature set, opens the file, resolves the scan window against its
    /// size, and resets all per-signature and per-file state.
    ///
    /// Validation failures are fatal to the whole execution and surface
    /// before any file is opened. A failure to open the source is fatal for
    /// that file only; the caller may skip to the next one.
    pub fn init(&mut self) -> Result<()> {
        let settings = self.status.settings();

        let mut signatures = settings.signatures.clone();
        // window length covers the full set, computed before disabling
        let window_len = validate_and_normalize(&mut signatures)?;
        let (active, disabled) = disable(signatures, &settings.disabled_signatures);

        let (index, path) = self.status.current_file();
        let path = path.ok_or(CarveError::NoSuchSource(index))?;
        let file = File::open(&path).map_err(|e| CarveError::SourceIo {
            path: path.clone(),
            source: e,
        })?;
        let file_size = file
            .metadata()
            .map_err(|e| CarveError::SourceIo {
                path: path.clone(),
                source: e,
            })?
            .len();

        fs::create_dir_all(&settings.dest_folder)?;

        let (start, end) = self.status.resolve_window(file_size);
        let names: Vec<String> = active.iter().map(|s| s.name.clone()).collect();
        self.status.reset_file_counters(&names);

        info!(
            source = %path.display(),
            size = file_size,
            window = window_len,
            active = active.len(),
            disabled = disabled.len(),
            "scan initialized"
        );

        self.scratch = active.iter().map(|_| SignatureScratch::default()).collect();
        self.active = active;
        self.window_len = window_len;
        self.source = Some(BufReader::new(file));
        self.source_path = path;
        self.file_start = start;
        self.file_end = end;
        Ok(())
    }

    /// Runs the scan over the current source file to completion (or until
    /// cancellation), updating the shared status throughout and finalizing
    /// the file's result record before returning.
    pub fn scan(&mut self) -> Result<()> {
        let mut source = self.source.take().ok_or(CarveError::NotInitialized)?;

        let span = self.file_end.saturating_sub(self.file_start);
        self.status.started_one_source_file(span);

        source.seek(SeekFrom::Start(self.file_start))?;

        // Pre-fill the window with up to W-1 bytes; the loop below appends
        // one byte per step and drops the head once the position has been
        // examined, flushing the tail positions after the range is exhausted.
        let mut window: Vec<u8> = vec![0u8; (self.window_len - 1).min(span as usize)];
        let filled = read_some(&mut source, &mut window)?;
        window.truncate(filled);
        let mut pos = self.file_start + filled as u64;

        let tick = (span / self.status.settings().output_frequency.max(1)).max(1);
        let mut next_tick = tick;
        let mut cancelled = false;

        loop {
            if self.status.is_cancelled() {
                cancelled = true;
                break;
            }

            if pos < self.file_end {
                let mut byte = [0u8; 1];
                if read_some(&mut source, &mut byte)? == 1 {
                    window.push(byte[0]);
                    pos += 1;
                }
            }

            if pos - self.file_start >= next_tick {
                self.status.update_progress(pos - self.file_start);
                next_tick += tick;
            }

            if !window.is_empty() {
                self.examine(&mut source, &window, pos)?;
            }

            if window.len() <= 1 {
                break;
            }
            window.remove(0);
        }

        let snapshot_found = self
            .status
            .snapshot()
            .current_counts
            .values()
            .sum::<u64>();
        if cancelled {
            info!(source = %self.source_path.display(), found = snapshot_found, "scan cancelled");
        } else {
            info!(source = %self.source_path.display(), found = snapshot_found, "scan finished");
        }
        self.status.finished_one_source_file();
        Ok(())
    }

    /// Tests every active signature against the window at its current
    /// position. `pos` is the absolute offset just past the window's last
    /// byte.
    fn examine(
        &mut self,
        source: &mut BufReader<File>,
        window: &[u8],
        pos: u64,
    ) -> Result<()> {
        let window_base = pos - window.len() as u64;

        for (idx, sig) in self.active.iter().enumerate() {
            let scratch = &mut self.scratch[idx];

            match scratch.pending_start {
                None => {
                    if !matching::prefilter(window, &sig.start_pattern)
                        || !matching::matches(window, &sig.start_pattern)
                    {
                        continue;
                    }
                    let start = window_base;
                    debug!(signature = %sig.name, offset = start, "start pattern matched");

                    match &sig.end {
                        EndStrategy::EndSequence { .. } => {
                            scratch.pending_start = Some(start);
                            scratch.skipped = 0;
                        }
                        EndStrategy::EmbeddedSize {
                            size_offsets,
                            correction,
                        } => {
                            match resolve_embedded_size(source, size_offsets, *correction, start) {
                                Ok(Some(end)) => {
                                    emit_carve(source, &self.status, sig, start, end);
                                }
                                Ok(None) => {
                                    warn!(
                                        signature = %sig.name,
                                        offset = start,
                                        "embedded size yields no usable length, candidate dropped"
                                    );
                                }
                                Err(e) => {
                                    warn!(
                                        signature = %sig.name,
                                        offset = start,
                                        error = %e,
                                        "unable to read embedded size bytes, candidate dropped"
                                    );
                                }
                            }
                            source.seek(SeekFrom::Start(pos))?;
                        }
                        EndStrategy::Manual { resolver } => {
                            let outcome = resolver.resolve_end(source, start);
                            source.seek(SeekFrom::Start(pos))?;
                            match outcome {
                                Ok(Some(end)) if end >= start => {
                                    emit_carve(source, &self.status, sig, start, end);
                                    source.seek(SeekFrom::Start(pos))?;
                                }
                                Ok(_) => {
                                    debug!(
                                        signature = %sig.name,
                                        offset = start,
                                        "no valid end address, candidate dropped"
                                    );
                                }
                                Err(e) => {
                                    warn!(
                                        signature = %sig.name,
                                        offset = start,
                                        error = %e,
                                        "end resolver failed, candidate dropped"
                                    );
                                }
                            }
                        }
                    }
                }
                Some(start) => {
                    let EndStrategy::EndSequence {
                        end_pattern,
                        skip_count,
                    } = &sig.end
                    else {
                        continue;
                    };
                    // an end sequence inside the start pattern is not an end
                    if pos < start + sig.start_pattern.len() as u64 {
                        continue;
                    }
                    if !matching::prefilter(window, end_pattern)
                        || !matching::matches(window, end_pattern)
                    {
                        continue;
                    }
                    let end = window_base + end_pattern.len() as u64 - 1;
                    if scratch.skipped < *skip_count {
                        scratch.skipped += 1;
                        debug!(
                            signature = %sig.name,
                            offset = end,
                            skipped = scratch.skipped,
                            "end pattern matched, skipped"
                        );
                        continue;
                    }
                    debug!(signature = %sig.name, offset = end, "end pattern matched");
                    emit_carve(source, &self.status, sig, start, end);
                    scratch.pending_start = None;
                    scratch.skipped = 0;
                }
            }
        }
        Ok(())
    }
}

/// Reads one byte per configured offset, accumulates them big-endian in
/// list order, applies the correction, and returns the inclusive end
/// offset. `None` when the corrected length is not positive.
fn resolve_embedded_size(
    source: &mut BufReader<File>,
    offsets: &[u64],
    correction: i64,
    start: u64,
) -> io::Result<Option<u64>> {
    let mut value: u64 = 0;
    for &off in offsets {
        source.seek(SeekFrom::Start(start + off))?;
        let mut byte = [0u8; 1];
        source.read_exact(&mut byte)?;
        value = value.wrapping_mul(256).wrapping_add(u64::from(byte[0]));
    }
    let total = value as i128 + i128::from(correction);
    if total <= 0 {
        return Ok(None);
    }
    Ok(Some(start + (total as u64) - 1))
}

/// Writes one carve and settles the accounting: counters advance only when
/// the file landed on disk; a failed write is logged, recorded in the
/// status, and the scan moves on.
fn emit_carve(
    source: &mut BufReader<File>,
    status: &ScanStatus,
    sig: &Signature,
    start: u64,
    end: u64,
) {
    let settings = status.settings();
    let counter = status.total_count(&sig.name) + settings.counter_start;
    match writer::write_carve(
        source,
        &sig.name,
        counter,
        settings.digits,
        &sig.extension,
        start,
        end,
        &settings.dest_folder,
    ) {
        Ok(path) => {
            info!(
                signature = %sig.name,
                start,
                end,
                path = %path.display(),
                "carved file"
            );
            status.found_file(&sig.name);
        }
        Err(e) => {
            warn!(signature = %sig.name, start, end, error = %e, "carve write failed");
            status.record_write_error(format!(
                "{}: [{start:#x}, {end:#x}]: {e}",
                sig.name
            ));
        }
    }
}

fn read_some(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
