//! File-type signatures and the compiled-in registry.
//!
//! Each signature identifies one recoverable file type by a start pattern
//! and carries one of three end-detection strategies: a literal end
//! sequence, a length encoded in the file's own header bytes, or an
//! externally supplied [`EndResolver`]. Patterns may contain wildcard
//! positions that match any byte.

use crate::error::{CarveError, Result};
use crate::resolver::{CrwEndResolver, EndResolver};
use std::fmt;
use std::sync::Arc;

/// A byte pattern; `None` entries are wildcards.
pub type Pattern = Vec<Option<u8>>;

/// Builds a [`Pattern`] literal; `_` marks a wildcard position.
macro_rules! pat {
    ($($b:tt),* $(,)?) => {
        vec![$(pat!(@byte $b)),*]
    };
    (@byte _) => { None };
    (@byte $b:expr) => { Some($b) };
}

/// How the end of a matched file is located.
#[derive(Clone)]
pub enum EndStrategy {
    /// The file ends at the first end-pattern occurrence after `skip_count`
    /// occurrences have been ignored. Formats with legitimate interior end
    /// markers (JPEG thumbnails, CR2 previews) set a non-zero skip count.
    EndSequence {
        end_pattern: Pattern,
        skip_count: u32,
    },
    /// The file length is stored in the header itself. Each offset locates
    /// one byte of the length, accumulated big-endian in list order;
    /// `correction` is added to the accumulated value.
    EmbeddedSize {
        size_offsets: Vec<u64>,
        correction: i64,
    },
    /// End address determined by an injected resolver.
    Manual { resolver: Arc<dyn EndResolver> },
}

impl fmt::Debug for EndStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndSequence {
                end_pattern,
                skip_count,
            } => f
                .debug_struct("EndSequence")
                .field("end_pattern", end_pattern)
                .field("skip_count", skip_count)
                .finish(),
            Self::EmbeddedSize {
                size_offsets,
                correction,
            } => f
                .debug_struct("EmbeddedSize")
                .field("size_offsets", size_offsets)
                .field("correction", correction)
                .finish(),
            Self::Manual { .. } => f.debug_struct("Manual").finish_non_exhaustive(),
        }
    }
}

/// Descriptor for one recoverable file type.
///
/// `name` must be unique within a signature set; it doubles as the prefix
/// of generated output filenames.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub description: String,
    pub extension: String,
    pub start_pattern: Pattern,
    pub end: EndStrategy,
}

impl Signature {
    pub(crate) fn max_pattern_len(&self) -> usize {
        let end_len = match &self.end {
            EndStrategy::EndSequence { end_pattern, .. } => end_pattern.len(),
            _ => 0,
        };
        self.start_pattern.len().max(end_len)
    }
}

/// The compiled-in signature registry.
///
/// Returned by value; executions work on their own copy so that disabling a
/// signature for one run never affects another.
pub fn builtin_signatures() -> Vec<Signature> {
    vec![
        Signature {
            name: "JPEG".into(),
            description: "JPEG Image File".into(),
            extension: "jpeg".into(),
            start_pattern: pat![0xFF, 0xD8, 0xFF, 0xE1],
            end: EndStrategy::EndSequence {
                end_pattern: pat![0xFF, 0xD9],
                // the EXIF thumbnail carries its own EOI marker
                skip_count: 1,
            },
        },
        Signature {
            name: "BMP".into(),
            description: "Bitmap Image File".into(),
            extension: "bmp".into(),
            start_pattern: pat![
                0x42, 0x4D, _, _, _, _, 0x00, 0x00, 0x00, 0x00, 0x36, _, 0x00, 0x00
            ],
            end: EndStrategy::EmbeddedSize {
                size_offsets: vec![0x05, 0x04, 0x03, 0x02],
                correction: 0,
            },
        },
        Signature {
            name: "GIF".into(),
            description: "GIF Image File".into(),
            extension: "gif".into(),
            start_pattern: pat![0x47, 0x49, 0x46, 0x38],
            end: EndStrategy::EndSequence {
                end_pattern: pat![0x00, 0x3B],
                skip_count: 0,
            },
        },
        Signature {
            name: "CR2".into(),
            description: "CR2 Canon Picture File".into(),
            extension: "cr2".into(),
            start_pattern: pat![
                0x49, 0x49, 0x2A, 0x00, 0x10, 0x00, 0x00, 0x00, 0x43, 0x52, 0x02, 0x00
            ],
            end: EndStrategy::EndSequence {
                end_pattern: pat![0xFF, 0xD9],
                skip_count: 2,
            },
        },
        Signature {
            name: "THM".into(),
            description: "THM Canon Picture Thumbnail File".into(),
            extension: "thm".into(),
            start_pattern: pat![
                0xFF, 0xD8, 0xFF, 0xE1, 0x09, 0xFE, 0x45, 0x78, 0x69, 0x66, 0x00, 0x00, 0x49, 0x49
            ],
            end: EndStrategy::EndSequence {
                end_pattern: pat![0xFF, 0xD9],
                skip_count: 0,
            },
        },
        Signature {
            name: "CRW".into(),
            description: "CRW Image File".into(),
            extension: "crw".into(),
            start_pattern: pat![
                0x49, 0x49, 0x1A, 0x00, 0x00, 0x00, 0x48, 0x45, 0x41, 0x50, 0x43, 0x43, 0x44, 0x52
            ],
            end: EndStrategy::Manual {
                resolver: Arc::new(CrwEndResolver::new()),
            },
        },
        Signature {
            name: "WAVE".into(),
            description: "WAVE Music File".into(),
            extension: "wav".into(),
            start_pattern: pat![0x52, 0x49, 0x46, 0x46],
            end: EndStrategy::EmbeddedSize {
                size_offsets: vec![0x07, 0x06, 0x05, 0x04],
                // the RIFF chunk size excludes the 8-byte header
                correction: 8,
            },
        },
        Signature {
            name: "PNG".into(),
            description: "Portable Network Graphics (PNG) Picture File".into(),
            extension: "png".into(),
            start_pattern: pat![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
            end: EndStrategy::EndSequence {
                end_pattern: pat![
                    0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82
                ],
                skip_count: 0,
            },
        },
    ]
}

/// Checks every signature against the model invariants, fills defaulted
/// fields, and returns the maximum length in bytes over all start and end
/// patterns in the set. That length sizes the engine's sliding window.
///
/// Idempotent: running it twice over the same set yields the same result
/// and the same signatures.
pub fn validate_and_normalize(signatures: &mut [Signature]) -> Result<usize> {
    let mut max_len = 1usize;
    for sig in signatures.iter_mut() {
        if sig.name.trim().is_empty() {
            return Err(CarveError::EmptyName);
        }
        if sig.start_pattern.is_empty() {
            return Err(CarveError::MissingField {
                signature: sig.name.clone(),
                field: "start_pattern",
            });
        }
        match &sig.end {
            EndStrategy::EndSequence { end_pattern, .. } if end_pattern.is_empty() => {
                return Err(CarveError::MissingField {
                    signature: sig.name.clone(),
                    field: "end_pattern",
                });
            }
            EndStrategy::EmbeddedSize { size_offsets, .. } if size_offsets.is_empty() => {
                return Err(CarveError::MissingField {
                    signature: sig.name.clone(),
                    field: "size_offsets",
                });
            }
            _ => {}
        }
        if sig.description.is_empty() {
            sig.description = "no description".into();
        }
        max_len = max_len.max(sig.max_pattern_len());
    }
    Ok(max_len)
}

/// Partitions a signature set by name membership in `names`, preserving the
/// relative order of both halves. Returns `(active, disabled)`.
pub fn disable(signatures: Vec<Signature>, names: &[String]) -> (Vec<Signature>, Vec<Signature>) {
    let (disabled, active): (Vec<_>, Vec<_>) = signatures
        .into_iter()
        .partition(|sig| names.iter().any(|n| n == &sig.name));
    (active, disabled)
}
