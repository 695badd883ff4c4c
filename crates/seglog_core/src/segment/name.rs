//! Segment file naming.
//!
//! A segment file is named after the logical offset of its first byte,
//! written as a zero-padded decimal so that a sorted directory listing is
//! also offset order.

use crate::error::{LogError, LogResult};
use std::path::Path;

/// Width of a segment file name in digits.
pub const SEGMENT_NAME_WIDTH: usize = 20;

/// Returns the file name for a segment starting at `offset`.
#[must_use]
pub fn segment_file_name(offset: u64) -> String {
    format!("{offset:0width$}", width = SEGMENT_NAME_WIDTH)
}

/// Parses a segment file name back into its starting offset.
///
/// # Errors
///
/// Returns [`LogError::InvalidFileName`] unless the name is exactly
/// [`SEGMENT_NAME_WIDTH`] ASCII digits.
pub fn parse_segment_file_name(name: &str) -> LogResult<u64> {
    if name.len() != SEGMENT_NAME_WIDTH || !name.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LogError::invalid_file_name(name));
    }
    name.parse::<u64>()
        .map_err(|_| LogError::invalid_file_name(name))
}

/// Parses the starting offset from the final component of `path`.
///
/// # Errors
///
/// Returns [`LogError::InvalidFileName`] if the path has no UTF-8 file name
/// or the name is not a segment name.
pub fn offset_from_path(path: &Path) -> LogResult<u64> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LogError::invalid_file_name(path.display().to_string()))?;
    parse_segment_file_name(name)
}
