//! A single memory-mapped segment file.

use crate::error::{LogError, LogResult};
use crate::segment::name::offset_from_path;
use memmap2::{MmapOptions, MmapRaw};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

/// Width of a fixed-size big-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    /// 2 bytes.
    Two,
    /// 4 bytes.
    Four,
    /// 8 bytes.
    Eight,
}

impl IntWidth {
    /// Number of bytes the integer occupies.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }
}

/// The mapping and the file it was created from.
struct Region {
    map: MmapRaw,
    file: File,
}

/// One fixed-capacity, memory-mapped file holding a contiguous slice of the
/// log.
///
/// # Cursors
///
/// - The write cursor counts bytes written relative to the segment start.
/// - The flush cursor counts bytes known to be synced; it never passes the
///   write cursor and never moves backwards.
///
/// # Thread Safety
///
/// Writes are serialized by an internal write lock that covers both the
/// cursor reservation and the byte copy, so concurrent appenders never
/// overlap. [`Segment::flush`] does not take the write lock and can run
/// alongside writers. Only [`Segment::close`] excludes everyone else.
pub struct Segment {
    path: PathBuf,
    start_offset: u64,
    capacity: u64,
    write_pos: AtomicU64,
    flush_pos: AtomicU64,
    write_lock: Mutex<()>,
    region: RwLock<Option<Region>>,
}

impl Segment {
    /// Opens or creates the segment file at `path` and maps `capacity` bytes.
    ///
    /// The file name must be a segment name (see
    /// [`segment_file_name`](crate::segment::segment_file_name)); the
    /// starting offset is taken from it. The file is resized to exactly
    /// `capacity` bytes. Cursors always start at zero, even when an existing
    /// file is reopened without truncation.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a segment name, the capacity is
    /// zero, or the file cannot be opened, resized, or mapped.
    pub fn create(path: &Path, capacity: u64, truncate_existing: bool) -> LogResult<Self> {
        let start_offset = offset_from_path(path)?;
        let len = usize::try_from(capacity)
            .ok()
            .filter(|&len| len > 0)
            .ok_or_else(|| {
                LogError::invalid_config(format!("invalid segment capacity {capacity}"))
            })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate_existing)
            .open(path)?;

        if file.metadata()?.len() != capacity {
            file.set_len(capacity)?;
        }

        let map = MmapOptions::new().len(len).map_raw(&file)?;
        if map.len() != len {
            return Err(LogError::allocation_failed(
                path,
                format!("mapped {} bytes, expected {len}", map.len()),
            ));
        }

        debug!(path = %path.display(), start_offset, capacity, "segment mapped");

        Ok(Self {
            path: path.to_path_buf(),
            start_offset,
            capacity,
            write_pos: AtomicU64::new(0),
            flush_pos: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            region: RwLock::new(Some(Region { map, file })),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file name of the backing file.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Logical offset of the first byte of this segment.
    #[must_use]
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Fixed capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes written so far.
    #[must_use]
    pub fn write_position(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Bytes known to be synced to the backing file.
    #[must_use]
    pub fn flush_position(&self) -> u64 {
        self.flush_pos.load(Ordering::Acquire)
    }

    /// Bytes that can still be written.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.capacity - self.write_position()
    }

    /// Returns true once the write cursor has reached the capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.write_position() == self.capacity
    }

    /// Returns true after [`Segment::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.region.read().is_none()
    }

    /// Copies `bytes` into the segment at `offset` and advances the write
    /// cursor by `bytes.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::OutOfBounds`] without writing anything if the range
    /// ends past the capacity or the cursor advance would pass it, and
    /// [`LogError::SegmentClosed`] after close.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> LogResult<()> {
        self.write_inner(Some(offset), bytes).map(|_| ())
    }

    /// Writes `bytes` at the current write cursor.
    ///
    /// Returns the offset, relative to the segment start, where the bytes
    /// were written.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn append(&self, bytes: &[u8]) -> LogResult<u64> {
        self.write_inner(None, bytes)
    }

    /// Writes the UTF-8 bytes of `s` at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn write_str_at(&self, offset: u64, s: &str) -> LogResult<()> {
        self.write_at(offset, s.as_bytes())
    }

    /// Appends the UTF-8 bytes of `s`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn append_str(&self, s: &str) -> LogResult<u64> {
        self.append(s.as_bytes())
    }

    /// Writes the low-order `width` bytes of `value` in big-endian order at
    /// `offset`. The write cursor advances by exactly `width` bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn put_fixed_int(&self, offset: u64, width: IntWidth, value: u64) -> LogResult<()> {
        self.write_at(offset, encode_fixed(width, value).as_slice())
    }

    /// Appends the low-order `width` bytes of `value` in big-endian order.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn append_fixed_int(&self, width: IntWidth, value: u64) -> LogResult<u64> {
        self.append(encode_fixed(width, value).as_slice())
    }

    /// Writes a big-endian `u16` at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn put_u16(&self, offset: u64, value: u16) -> LogResult<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    /// Writes a big-endian `u32` at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn put_u32(&self, offset: u64, value: u32) -> LogResult<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    /// Writes a big-endian `u64` at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn put_u64(&self, offset: u64, value: u64) -> LogResult<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    /// Appends a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn append_u16(&self, value: u16) -> LogResult<u64> {
        self.append(&value.to_be_bytes())
    }

    /// Appends a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn append_u32(&self, value: u32) -> LogResult<u64> {
        self.append(&value.to_be_bytes())
    }

    /// Appends a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::write_at`].
    pub fn append_u64(&self, value: u64) -> LogResult<u64> {
        self.append(&value.to_be_bytes())
    }

    /// Syncs the mapping to the backing file.
    ///
    /// On success the flush cursor moves up to the write cursor observed at
    /// the start of the call. It is never moved backwards, so concurrent
    /// flushes are harmless.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Flush`] if the sync fails and
    /// [`LogError::SegmentClosed`] after close.
    pub fn flush(&self) -> LogResult<()> {
        let guard = self.region.read();
        let region = guard
            .as_ref()
            .ok_or_else(|| LogError::segment_closed(&self.path))?;

        let observed = self.write_pos.load(Ordering::Acquire);
        if let Err(e) = region.map.flush() {
            error!(path = %self.path.display(), error = %e, "segment flush failed");
            return Err(LogError::Flush(e));
        }
        self.flush_pos.fetch_max(observed, Ordering::AcqRel);
        Ok(())
    }

    /// Flushes, then releases the mapping and the file handle.
    ///
    /// Every step is attempted even if an earlier one fails; all failures
    /// are returned together. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Close`] holding each step's error.
    pub fn close(&self) -> LogResult<()> {
        let Some(Region { map, file }) = self.region.write().take() else {
            return Ok(());
        };

        let mut errors = Vec::new();
        let observed = self.write_pos.load(Ordering::Acquire);
        match map.flush() {
            Ok(()) => {
                self.flush_pos.fetch_max(observed, Ordering::AcqRel);
            }
            Err(e) => errors.push(LogError::Flush(e)),
        }
        drop(map);

        if let Err(e) = file.sync_all() {
            errors.push(LogError::Io(e));
        }
        drop(file);

        if errors.is_empty() {
            debug!(path = %self.path.display(), "segment closed");
        } else {
            warn!(path = %self.path.display(), errors = errors.len(), "segment closed with errors");
        }
        LogError::aggregate(errors)
    }

    /// Copies `len` bytes starting at `offset` out of the mapping.
    ///
    /// This is a diagnostic accessor, not a record reader.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::OutOfBounds`] if the range ends past the capacity
    /// and [`LogError::SegmentClosed`] after close.
    pub fn read_at(&self, offset: u64, len: usize) -> LogResult<Vec<u8>> {
        let _writer = self.write_lock.lock();
        let guard = self.region.read();
        let region = guard
            .as_ref()
            .ok_or_else(|| LogError::segment_closed(&self.path))?;

        self.check_range(offset, len)?;
        Ok(copy_from(&region.map, offset as usize, len))
    }

    /// Returns the whole mapped region as text, with invalid UTF-8 replaced.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::SegmentClosed`] after close.
    pub fn debug_dump(&self) -> LogResult<String> {
        let bytes = self.read_at(0, self.capacity as usize)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn write_inner(&self, offset: Option<u64>, bytes: &[u8]) -> LogResult<u64> {
        let _writer = self.write_lock.lock();
        let guard = self.region.read();
        let region = guard
            .as_ref()
            .ok_or_else(|| LogError::segment_closed(&self.path))?;

        let cursor = self.write_pos.load(Ordering::Acquire);
        let offset = offset.unwrap_or(cursor);
        self.check_range(offset, bytes.len())?;
        self.check_range(cursor, bytes.len())?;

        copy_into(&region.map, offset as usize, bytes);
        self.write_pos
            .store(cursor + bytes.len() as u64, Ordering::Release);
        Ok(offset)
    }

    fn check_range(&self, offset: u64, len: usize) -> LogResult<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(LogError::out_of_bounds(offset, len, self.capacity)),
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("start_offset", &self.start_offset)
            .field("capacity", &self.capacity)
            .field("write_position", &self.write_position())
            .field("flush_position", &self.flush_position())
            .finish_non_exhaustive()
    }
}

/// Big-endian encoding of the low-order `width` bytes of `value`.
fn encode_fixed(width: IntWidth, value: u64) -> Vec<u8> {
    value.to_be_bytes()[8 - width.bytes()..].to_vec()
}

#[allow(unsafe_code)]
fn copy_into(map: &MmapRaw, offset: usize, bytes: &[u8]) {
    debug_assert!(offset + bytes.len() <= map.len());
    // SAFETY: the range lies inside the mapping, and callers hold the
    // segment's write lock so no other copy touches the region.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), map.as_mut_ptr().add(offset), bytes.len());
    }
}

#[allow(unsafe_code)]
fn copy_from(map: &MmapRaw, offset: usize, len: usize) -> Vec<u8> {
    debug_assert!(offset + len <= map.len());
    // SAFETY: as for `copy_into`; the write lock keeps writers out while
    // the slice is alive.
    unsafe { slice::from_raw_parts(map.as_ptr().add(offset), len) }.to_vec()
}
