//! Persists a matched byte range as a standalone output file.

use crate::resolver::SourceStream;
use std::fs::{self, File};
use std::io::{self, BufWriter, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const COPY_CHUNK: usize = 64 * 1024;

/// Copies the inclusive byte range `[start, end]` of `source` into a new
/// file `{name}_{counter zero-padded to digits}.{extension}` under
/// `dest_folder`, then restores the source's previous read position so the
/// caller can keep scanning where it left off.
///
/// An existing file with the same computed name is silently overwritten;
/// callers keep the counter monotonically increasing per signature to avoid
/// collisions. On failure no partial output is left behind.
pub fn write_carve(
    source: &mut dyn SourceStream,
    name: &str,
    counter: u64,
    digits: usize,
    extension: &str,
    start: u64,
    end: u64,
    dest_folder: &Path,
) -> io::Result<PathBuf> {
    debug_assert!(end >= start);
    let old_pos = source.stream_position()?;

    let filename = format!("{name}_{counter:0width$}.{extension}", width = digits);
    let path = dest_folder.join(filename);

    let outcome = copy_range(source, start, end, &path);
    if outcome.is_err() {
        let _ = fs::remove_file(&path);
    }
    let restore = source.seek(SeekFrom::Start(old_pos));

    outcome?;
    restore?;
    debug!(path = %path.display(), start, end, bytes = end - start + 1, "wrote carve file");
    Ok(path)
}

fn copy_range(
    source: &mut dyn SourceStream,
    start: u64,
    end: u64,
    path: &Path,
) -> io::Result<()> {
    source.seek(SeekFrom::Start(start))?;

    let mut remaining = end - start + 1;
    let mut writer = BufWriter::new(File::create(path)?);
    let mut buf = vec![0u8; COPY_CHUNK.min(remaining as usize)];

    while remaining > 0 {
        let take = COPY_CHUNK.min(remaining as usize);
        source.read_exact(&mut buf[..take])?;
        writer.write_all(&buf[..take])?;
        remaining -= take as u64;
    }
    writer.flush()?;
    Ok(())
}
