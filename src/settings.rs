//! Static configuration for one carving execution.

use crate::signature::{Signature, builtin_signatures};
use std::path::PathBuf;

pub const DEF_DIGITS: usize = 5;
pub const DEF_COUNTER_START: u64 = 1;
pub const DEF_FOLDER: &str = "./";
pub const DEF_OUTPUT_LEVEL: u8 = 2;
pub const DEF_OUTPUT_FREQUENCY: u64 = 100;

/// Everything fixed for the lifetime of one execution: output filename
/// shape, destination, verbosity, progress frequency, the signature set and
/// which of its entries are disabled, and the source files to scan in order.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Width of the zero-padded numeric part of output filenames.
    pub digits: usize,
    /// First number used for output filenames; the per-signature counter
    /// continues across source files.
    pub counter_start: u64,
    pub dest_folder: PathBuf,
    /// Verbosity hint for a reporting front end; the engine itself emits
    /// structured trace events regardless.
    pub output_level: u8,
    /// Number of progress updates to emit per source file, independent of
    /// file size.
    pub output_frequency: u64,
    pub disabled_signatures: Vec<String>,
    pub source_files: Vec<PathBuf>,
    pub signatures: Vec<Signature>,
}

impl ScanSettings {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Self {
            digits: DEF_DIGITS,
            counter_start: DEF_COUNTER_START,
            dest_folder: PathBuf::from(DEF_FOLDER),
            output_level: DEF_OUTPUT_LEVEL,
            output_frequency: DEF_OUTPUT_FREQUENCY,
            disabled_signatures: Vec::new(),
            source_files: Vec::new(),
            signatures,
        }
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.source_files.len()
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::new(builtin_signatures())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ScanSettings::default();
        assert_eq!(settings.digits, 5);
        assert_eq!(settings.counter_start, 1);
        assert_eq!(settings.output_frequency, 100);
        assert_eq!(settings.signatures.len(), 8);
        assert_eq!(settings.source_count(), 0);
    }
}
