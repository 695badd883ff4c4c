//! Fixed-capacity, memory-mapped segment files.
//!
//! Each segment covers a contiguous range of the logical byte stream and is
//! named after the offset of its first byte:
//!
//! ```text
//! <log_dir>/
//! ├─ 00000000000000000000   # bytes [0, capacity)
//! ├─ 00000000000001048576   # bytes [capacity, 2 * capacity)
//! └─ ...
//! ```
//!
//! Segments carry no header, footer, or checksum. The byte layout inside a
//! segment belongs to the caller.

mod mapped;
mod name;

pub use mapped::{IntWidth, Segment};
pub use name::{offset_from_path, parse_segment_file_name, segment_file_name, SEGMENT_NAME_WIDTH};
