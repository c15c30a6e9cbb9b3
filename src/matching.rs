//! Window-against-pattern comparison, the innermost loop of the scanner.
//!
//! A pattern position of `None` is a wildcard and matches any byte. The
//! engine calls [`prefilter`] before [`matches`] so that the full comparison
//! only runs when the first byte already lines up.

/// Returns true iff `window` is at least as long as `pattern` and every
/// non-wildcard pattern position equals the corresponding window byte.
#[inline]
#[must_use]
pub fn matches(window: &[u8], pattern: &[Option<u8>]) -> bool {
    if window.len() < pattern.len() {
        return false;
    }
    pattern
        .iter()
        .zip(window)
        .all(|(p, byte)| p.is_none_or(|expected| expected == *byte))
}

/// Cheap first-byte check. A wildcard in the first pattern position passes
/// any non-empty window; an empty window or empty pattern never passes.
#[inline]
#[must_use]
pub fn prefilter(window: &[u8], pattern: &[Option<u8>]) -> bool {
    match (window.first(), pattern.first()) {
        (Some(byte), Some(Some(expected))) => byte == expected,
        (Some(_), Some(None)) => true,
        _ => false,
    }
}
