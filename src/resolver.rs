//! End-address resolution for file types whose length is neither marked by
//! an end sequence nor stored in the header.
//!
//! Resolvers are capability objects injected into a signature at
//! registration time; the engine dispatches to them without knowing the
//! file type, so new formats can be added without touching the scan loop.

use memchr::memmem::Finder;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::debug;

/// A seekable byte stream the engine scans. Blanket-implemented for
/// anything that can read and seek, so tests can run against in-memory
/// cursors while production scans run against files.
pub trait SourceStream: Read + Seek {}

impl<T: Read + Seek> SourceStream for T {}

/// Locates the end of a file whose start pattern matched at `start`.
///
/// The stream arrives positioned at the engine's current read position;
/// implementations may read and seek freely, the engine restores the
/// position afterwards on every path.
///
/// Returns `Ok(Some(end))` with the inclusive end offset, or `Ok(None)`
/// when no valid end could be determined (the candidate is dropped, not an
/// error).
pub trait EndResolver: Send + Sync {
    fn resolve_end(&self, source: &mut dyn SourceStream, start: u64) -> io::Result<Option<u64>>;
}

const DIR_MARKER: &[u8] = &[0x03, 0x00, 0x05, 0x20];
const ZERO_RUN: [u8; 5] = [0x00; 5];
const CONFIRM_A: [u8; 2] = [0x07, 0x20];
const CONFIRM_B: [u8; 2] = [0x0A, 0x30];
const TAIL_LEN: u64 = 35;
const READ_CHUNK: usize = 64 * 1024;

/// End resolver for Canon CRW images.
///
/// CRW files close with a directory block whose entries sit at fixed
/// distances from a `03 00 05 20` marker; the resolver scans forward for
/// the marker, confirms the surrounding entries, and reports the end 35
/// bytes past the marker. Derived from sample files of one camera family;
/// there is no upper bound on how far it will search.
pub struct CrwEndResolver {
    marker: Finder<'static>,
}

impl CrwEndResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            marker: Finder::new(DIR_MARKER),
        }
    }

    fn confirm(&self, source: &mut dyn SourceStream, marker_pos: u64) -> io::Result<bool> {
        let mut zeros = [0u8; 5];
        if !read_at(source, marker_pos + 7, &mut zeros)? || zeros != ZERO_RUN {
            return Ok(false);
        }
        let mut pair = [0u8; 2];
        if !read_at(source, marker_pos + 12, &mut pair)? || pair != CONFIRM_A {
            return Ok(false);
        }
        if !read_at(source, marker_pos + 22, &mut pair)? || pair != CONFIRM_B {
            return Ok(false);
        }
        Ok(true)
    }
}

impl Default for CrwEndResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EndResolver for CrwEndResolver {
    fn resolve_end(&self, source: &mut dyn SourceStream, start: u64) -> io::Result<Option<u64>> {
        let mut base = source.stream_position()?;
        let mut window: Vec<u8> = Vec::with_capacity(READ_CHUNK + DIR_MARKER.len());

        loop {
            source.seek(SeekFrom::Start(base + window.len() as u64))?;
            let tail = window.len();
            window.resize(tail + READ_CHUNK, 0);
            let got = read_some(source, &mut window[tail..])?;
            window.truncate(tail + got);

            let mut search_from = 0;
            while let Some(rel) = self.marker.find(&window[search_from..]) {
                let marker_pos = base + (search_from + rel) as u64;
                if self.confirm(source, marker_pos)? {
                    debug!(start, end = marker_pos + TAIL_LEN, "directory block confirmed");
                    return Ok(Some(marker_pos + TAIL_LEN));
                }
                search_from += rel + 1;
            }

            if got == 0 {
                return Ok(None);
            }

            // keep a marker-sized overlap for matches straddling the chunk edge
            if window.len() > DIR_MARKER.len() - 1 {
                let drop = window.len() - (DIR_MARKER.len() - 1);
                window.drain(..drop);
                base += drop as u64;
            }
        }
    }
}

/// Reads `buf.len()` bytes at `pos`; false when the stream ends first.
fn read_at(source: &mut dyn SourceStream, pos: u64, buf: &mut [u8]) -> io::Result<bool> {
    source.seek(SeekFrom::Start(pos))?;
    match source.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_some(source: &mut dyn SourceStream, buf: &mut [u8]) -> io::Result<usize> {
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
