//! Ordered view over the segments of one log directory.

use crate::allocate::AllocationService;
use crate::config::LogConfig;
use crate::dir::LogDir;
use crate::error::{LogError, LogResult};
use crate::segment::Segment;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State of the newest segment.
enum Tail {
    /// The tail segment still has room.
    Writable(Arc<Segment>),
    /// The queue is empty or the tail is full; the next segment starts here.
    Next(u64),
}

/// Tracks the segments of one stream, oldest first, and hands out the
/// segment currently accepting writes.
///
/// New segments come from a shared [`AllocationService`]. Whenever the queue
/// needs segment `n`, it also asks for segment `n + 1` so that crossing the
/// next boundary does not wait on file creation.
///
/// # Invariants
///
/// - Start offsets of adjacent segments differ by exactly the segment size.
/// - The list only grows at the tail.
///
/// # Example
///
/// ```no_run
/// use seglog_core::{AllocationService, LogConfig, SegmentQueue};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// let config = LogConfig::default();
/// let service = Arc::new(AllocationService::new(&config).unwrap());
/// service.start().unwrap();
///
/// let queue = SegmentQueue::open(Path::new("stream"), &config, service).unwrap();
/// let segment = queue.get_writable_segment(true).unwrap().unwrap();
/// segment.append(b"hello").unwrap();
/// queue.flush().unwrap();
/// ```
pub struct SegmentQueue {
    dir: LogDir,
    segment_size: u64,
    service: Arc<AllocationService>,
    segments: Mutex<Vec<Arc<Segment>>>,
    /// Held across a boundary crossing; `segments` is not.
    allocating: Mutex<()>,
    /// Serializes multi-segment appends.
    append_lock: Mutex<()>,
    flushed_where: AtomicU64,
    closed: AtomicBool,
}

impl SegmentQueue {
    /// Opens a queue over the directory at `path`, creating it if needed.
    ///
    /// Existing segment files are not loaded; the queue starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the directory
    /// cannot be created or locked.
    pub fn open(path: &Path, config: &LogConfig, service: Arc<AllocationService>) -> LogResult<Self> {
        config.validate()?;
        let dir = LogDir::open(path, true)?;

        info!(path = %path.display(), segment_size = config.segment_size, "segment queue opened");

        Ok(Self {
            dir,
            segment_size: config.segment_size,
            service,
            segments: Mutex::new(Vec::new()),
            allocating: Mutex::new(()),
            append_lock: Mutex::new(()),
            flushed_where: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the segment currently accepting writes.
    ///
    /// The last tracked segment is returned if it is not full. Otherwise,
    /// when `create_if_missing` is true, the next segment is allocated,
    /// appended to the queue, and returned; when it is false, `None` is
    /// returned.
    ///
    /// This blocks only while waiting on an allocation, which happens only
    /// when crossing a segment boundary. Other threads crossing the same
    /// boundary wait for that allocation; flushes and accessors do not.
    ///
    /// # Errors
    ///
    /// Allocation timeouts and failures are returned unchanged; nothing is
    /// added to the queue in that case.
    pub fn get_writable_segment(&self, create_if_missing: bool) -> LogResult<Option<Arc<Segment>>> {
        if let Tail::Writable(segment) = self.tail()? {
            return Ok(Some(segment));
        }
        if !create_if_missing {
            return Ok(None);
        }

        let _allocating = self.allocating.lock();
        // Another thread may have crossed the boundary while we waited.
        let next_offset = match self.tail()? {
            Tail::Writable(segment) => return Ok(Some(segment)),
            Tail::Next(offset) => offset,
        };

        let segment = self.allocate(next_offset)?;

        let mut segments = self.segments.lock();
        if self.is_closed() {
            drop(segments);
            self.discard(&segment, next_offset);
            return Err(LogError::queue_closed(self.dir.path()));
        }
        segments.push(Arc::clone(&segment));
        Ok(Some(segment))
    }

    fn tail(&self) -> LogResult<Tail> {
        let segments = self.segments.lock();
        self.ensure_open()?;
        match segments.last() {
            Some(last) if !last.is_full() => Ok(Tail::Writable(Arc::clone(last))),
            Some(last) => Ok(Tail::Next(self.offset_after(last.start_offset())?)),
            None => Ok(Tail::Next(0)),
        }
    }

    /// Appends `bytes` to the stream, continuing into new segments as each
    /// fills up.
    ///
    /// Returns the logical offset of the first byte written.
    ///
    /// Appends are serialized against each other. Writers that go straight
    /// to a segment from [`SegmentQueue::get_writable_segment`] may still
    /// interleave with the chunks of one append; a chunk that loses the
    /// race for the remaining space is retried rather than failed.
    ///
    /// # Errors
    ///
    /// Returns an allocation error if a new segment is needed and cannot be
    /// obtained. Bytes written before the error stay written.
    pub fn append(&self, bytes: &[u8]) -> LogResult<u64> {
        let _appender = self.append_lock.lock();
        if bytes.is_empty() {
            return Ok(self.write_offset());
        }

        let mut first = None;
        let mut rest = bytes;
        while !rest.is_empty() {
            let segment = self
                .get_writable_segment(true)?
                .ok_or_else(|| LogError::queue_closed(self.dir.path()))?;

            let room = usize::try_from(segment.remaining()).unwrap_or(usize::MAX);
            let take = rest.len().min(room);
            if take == 0 {
                continue;
            }
            match segment.append(&rest[..take]) {
                Ok(at) => {
                    first.get_or_insert(segment.start_offset() + at);
                    rest = &rest[take..];
                }
                Err(LogError::OutOfBounds { .. }) => {
                    debug!(path = %segment.path().display(), "segment filled by another writer, retrying chunk");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(first.unwrap_or_else(|| self.write_offset()))
    }

    /// Flushes every segment with unflushed writes and advances the flush
    /// watermark.
    ///
    /// Returns the new watermark.
    ///
    /// # Errors
    ///
    /// Returns the first segment flush error.
    pub fn flush(&self) -> LogResult<u64> {
        let segments = self.segments();
        let mut watermark = self.flushed_where();

        for segment in &segments {
            if segment.flush_position() == segment.write_position() {
                continue;
            }
            segment.flush()?;
            watermark = watermark.max(segment.start_offset() + segment.flush_position());
        }

        self.flushed_where.fetch_max(watermark, Ordering::AcqRel);
        Ok(self.flushed_where())
    }

    /// Closes every tracked segment and stops the queue.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Close`] with the errors of every segment that
    /// failed to close.
    pub fn close(&self) -> LogResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let segments = std::mem::take(&mut *self.segments.lock());
        let count = segments.len();
        let mut errors = Vec::new();

        // Nothing will claim the next segment or the one after it.
        let next = match segments.last() {
            Some(last) => last.start_offset().checked_add(self.segment_size),
            None => Some(0),
        };
        for offset in [next, next.and_then(|n| n.checked_add(self.segment_size))]
            .into_iter()
            .flatten()
        {
            self.service.release(&self.dir.segment_path(offset));
        }

        for segment in segments {
            match segment.close() {
                Ok(()) => {
                    self.flushed_where.fetch_max(
                        segment.start_offset() + segment.flush_position(),
                        Ordering::AcqRel,
                    );
                }
                Err(LogError::Close { errors: inner }) => errors.extend(inner),
                Err(e) => errors.push(e),
            }
        }

        info!(path = %self.dir.path().display(), segments = count, "segment queue closed");
        LogError::aggregate(errors)
    }

    /// Returns the log directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the fixed segment size.
    #[must_use]
    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Returns the number of tracked segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.lock().len()
    }

    /// Returns the tracked segments, oldest first.
    #[must_use]
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments.lock().clone()
    }

    /// Returns the newest tracked segment.
    #[must_use]
    pub fn last_segment(&self) -> Option<Arc<Segment>> {
        self.segments.lock().last().cloned()
    }

    /// Logical offset one past the last byte written.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        self.last_segment()
            .map_or(0, |s| s.start_offset() + s.write_position())
    }

    /// Logical offset up to which segments are known to be flushed.
    #[must_use]
    pub fn flushed_where(&self) -> u64 {
        self.flushed_where.load(Ordering::Acquire)
    }

    /// Returns true after [`SegmentQueue::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> LogResult<()> {
        if self.is_closed() {
            return Err(LogError::queue_closed(self.dir.path()));
        }
        Ok(())
    }

    fn offset_after(&self, offset: u64) -> LogResult<u64> {
        offset.checked_add(self.segment_size).ok_or_else(|| {
            LogError::invalid_config(format!("offset space exhausted after {offset}"))
        })
    }

    fn allocate(&self, offset: u64) -> LogResult<Arc<Segment>> {
        let path = self.dir.segment_path(offset);
        let lookahead = self.dir.segment_path(self.offset_after(offset)?);

        let segment = self.service.request(&path, &lookahead).map_err(|e| {
            error!(path = %path.display(), error = %e, "segment allocation failed");
            e
        })?;

        if segment.capacity() != self.segment_size {
            return Err(LogError::allocation_failed(
                &path,
                format!(
                    "allocated segment has capacity {}, queue expects {}",
                    segment.capacity(),
                    self.segment_size
                ),
            ));
        }

        debug!(path = %path.display(), offset, "segment added to queue");
        Ok(segment)
    }

    /// Closes a segment allocated after the queue was closed, and drops its
    /// look-ahead.
    fn discard(&self, segment: &Segment, offset: u64) {
        if let Err(e) = segment.close() {
            warn!(path = %segment.path().display(), error = %e, "discarded segment closed with errors");
        }
        if let Ok(next) = self.offset_after(offset) {
            self.service.release(&self.dir.segment_path(next));
        }
    }
}

impl Drop for SegmentQueue {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.dir.path().display(), error = %e, "segment queue closed with errors on drop");
        }
    }
}

impl std::fmt::Debug for SegmentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentQueue")
            .field("directory", &self.dir.path())
            .field("segment_size", &self.segment_size)
            .field("segment_count", &self.segment_count())
            .field("flushed_where", &self.flushed_where())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocate::{MappedSegmentFactory, SegmentFactory};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::{tempdir, TempDir};

    fn config(segment_size: u64) -> LogConfig {
        LogConfig::new()
            .segment_size(segment_size)
            .pool_size(2)
            .allocation_timeout(Duration::from_secs(5))
    }

    fn open_queue(segment_size: u64) -> (TempDir, SegmentQueue) {
        let dir = tempdir().unwrap();
        let config = config(segment_size);
        let service = Arc::new(AllocationService::new(&config).unwrap());
        service.start().unwrap();
        let queue = SegmentQueue::open(&dir.path().join("stream"), &config, service).unwrap();
        (dir, queue)
    }

    #[test]
    fn empty_queue_without_create_returns_none() {
        let (_dir, queue) = open_queue(16);
        assert!(queue.get_writable_segment(false).unwrap().is_none());
        assert_eq!(queue.segment_count(), 0);
    }

    #[test]
    fn first_segment_is_offset_zero() {
        let (_dir, queue) = open_queue(16);
        let segment = queue.get_writable_segment(true).unwrap().unwrap();

        assert_eq!(segment.file_name(), "00000000000000000000");
        assert_eq!(segment.start_offset(), 0);
        assert_eq!(queue.segment_count(), 1);
    }

    #[test]
    fn returns_cached_segment_until_full() {
        let (_dir, queue) = open_queue(16);
        let first = queue.get_writable_segment(true).unwrap().unwrap();
        first.append(b"abc").unwrap();

        let again = queue.get_writable_segment(true).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let without_create = queue.get_writable_segment(false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &without_create));
    }

    #[test]
    fn full_segment_without_create_returns_none() {
        let (_dir, queue) = open_queue(4);
        let segment = queue.get_writable_segment(true).unwrap().unwrap();
        segment.append_u32(42).unwrap();

        assert!(queue.get_writable_segment(false).unwrap().is_none());
        assert_eq!(queue.segment_count(), 1);
    }

    #[test]
    fn hello_fills_sixteen_byte_segment() {
        let (_dir, queue) = open_queue(16);
        let segment = queue.get_writable_segment(true).unwrap().unwrap();

        segment.append(b"HELLO").unwrap();
        assert_eq!(segment.write_position(), 5);

        assert!(segment.append(b"-and-11-more").is_err());
        segment.append(b" and 11 mor").unwrap();
        assert_eq!(segment.write_position(), 16);
        assert!(segment.is_full());

        let next = queue.get_writable_segment(true).unwrap().unwrap();
        assert_eq!(next.file_name(), "00000000000000000016");
        assert_eq!(next.start_offset(), 16);
        assert_eq!(queue.segment_count(), 2);
    }

    #[test]
    fn one_mib_segments_named_by_offset() {
        let (_dir, queue) = open_queue(1 << 20);
        let first = queue.get_writable_segment(true).unwrap().unwrap();
        assert_eq!(first.file_name(), "00000000000000000000");

        first.append(&vec![7u8; 1 << 20]).unwrap();
        assert!(first.is_full());

        let second = queue.get_writable_segment(true).unwrap().unwrap();
        assert_eq!(second.file_name(), "00000000000001048576");
    }

    #[test]
    fn adjacent_offsets_differ_by_segment_size() {
        let (_dir, queue) = open_queue(8);
        for _ in 0..5 {
            let segment = queue.get_writable_segment(true).unwrap().unwrap();
            segment.append_u64(1).unwrap();
        }

        let offsets: Vec<u64> = queue.segments().iter().map(|s| s.start_offset()).collect();
        assert_eq!(offsets, vec![0, 8, 16, 24, 32]);
    }

    #[test]
    fn lookahead_file_exists_after_first_allocation() {
        let (dir, queue) = open_queue(16);
        queue.get_writable_segment(true).unwrap();

        let next = dir.path().join("stream").join("00000000000000000016");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !next.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(next.exists());
    }

    #[test]
    fn append_spans_segments() {
        let (_dir, queue) = open_queue(8);

        assert_eq!(queue.append(b"0123").unwrap(), 0);
        assert_eq!(queue.append(b"456789abcdefgh").unwrap(), 4);
        assert_eq!(queue.write_offset(), 18);
        assert_eq!(queue.segment_count(), 3);

        let segments = queue.segments();
        assert_eq!(segments[0].read_at(0, 8).unwrap(), b"01234567");
        assert_eq!(segments[1].read_at(0, 8).unwrap(), b"89abcdef");
        assert_eq!(segments[2].read_at(0, 2).unwrap(), b"gh");
    }

    #[test]
    fn empty_append_allocates_nothing() {
        let (_dir, queue) = open_queue(8);
        assert_eq!(queue.append(b"").unwrap(), 0);
        assert_eq!(queue.segment_count(), 0);
    }

    #[test]
    fn flush_advances_watermark() {
        let (_dir, queue) = open_queue(8);
        queue.append(b"0123456789").unwrap();
        assert_eq!(queue.flushed_where(), 0);

        assert_eq!(queue.flush().unwrap(), 10);
        assert_eq!(queue.flush().unwrap(), 10);

        for segment in queue.segments() {
            assert_eq!(segment.flush_position(), segment.write_position());
        }
    }

    #[test]
    fn close_closes_segments_and_rejects_further_use() {
        let (_dir, queue) = open_queue(8);
        queue.append(b"abc").unwrap();
        let segment = queue.last_segment().unwrap();

        queue.close().unwrap();
        assert!(queue.is_closed());
        assert!(segment.is_closed());
        assert_eq!(queue.flushed_where(), 3);
        assert_eq!(queue.segment_count(), 0);

        let result = queue.get_writable_segment(true);
        assert!(matches!(result, Err(LogError::QueueClosed { .. })));
        queue.close().unwrap();
    }

    #[test]
    fn timeout_propagates_and_adds_nothing() {
        let dir = tempdir().unwrap();
        let config = config(16)
            .pool_size(0)
            .allocation_timeout(Duration::from_millis(50));
        let service = Arc::new(AllocationService::new(&config).unwrap());
        service.start().unwrap();
        let queue = SegmentQueue::open(dir.path(), &config, service).unwrap();

        let result = queue.get_writable_segment(true);
        assert!(matches!(result, Err(LogError::AllocationTimeout { .. })));
        assert_eq!(queue.segment_count(), 0);
    }

    struct FailingFactory;

    impl SegmentFactory for FailingFactory {
        fn create(&self, path: &Path) -> LogResult<Segment> {
            Err(LogError::allocation_failed(path, "disk on fire"))
        }
    }

    #[test]
    fn failure_propagates_and_adds_nothing() {
        let dir = tempdir().unwrap();
        let config = config(16);
        let service = Arc::new(AllocationService::with_factory(&config, Arc::new(FailingFactory)));
        service.start().unwrap();
        let queue = SegmentQueue::open(dir.path(), &config, service).unwrap();

        let result = queue.get_writable_segment(true);
        let Err(LogError::AllocationFailed { message, .. }) = result else {
            panic!("expected allocation failure, got {result:?}");
        };
        assert!(message.contains("disk on fire"));
        assert_eq!(queue.segment_count(), 0);
    }

    #[test]
    fn capacity_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let service = Arc::new(AllocationService::new(&config(32)).unwrap());
        service.start().unwrap();
        let queue = SegmentQueue::open(dir.path(), &config(16), service).unwrap();

        let result = queue.get_writable_segment(true);
        let Err(LogError::AllocationFailed { message, .. }) = result else {
            panic!("expected allocation failure, got {result:?}");
        };
        assert!(message.contains("capacity 32"));
        assert_eq!(queue.segment_count(), 0);
    }

    #[test]
    fn second_queue_on_same_directory_is_locked() {
        let (dir, _queue) = open_queue(16);
        let config = config(16);
        let service = Arc::new(AllocationService::new(&config).unwrap());

        let result = SegmentQueue::open(&dir.path().join("stream"), &config, service);
        assert!(matches!(result, Err(LogError::DirectoryLocked { .. })));
    }

    #[test]
    fn flush_does_not_wait_on_allocation() {
        let dir = tempdir().unwrap();
        let config = config(16)
            .pool_size(0)
            .allocation_timeout(Duration::from_secs(2));
        let service = Arc::new(AllocationService::new(&config).unwrap());
        service.start().unwrap();
        let queue = Arc::new(SegmentQueue::open(dir.path(), &config, service).unwrap());

        let crossing = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get_writable_segment(true))
        };
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        assert_eq!(queue.flush().unwrap(), 0);
        assert_eq!(queue.segment_count(), 0);
        assert_eq!(queue.write_offset(), 0);
        assert!(started.elapsed() < Duration::from_millis(500));

        let result = crossing.join().unwrap();
        assert!(matches!(result, Err(LogError::AllocationTimeout { .. })));
    }

    #[test]
    fn close_releases_lookahead() {
        let temp = tempdir().unwrap();
        let config = config(16);
        let service = Arc::new(AllocationService::new(&config).unwrap());
        service.start().unwrap();

        for i in 0..10 {
            let path = temp.path().join(format!("stream-{i}"));
            let queue = SegmentQueue::open(&path, &config, Arc::clone(&service)).unwrap();
            queue.append(b"twenty bytes of data").unwrap();
            queue.close().unwrap();
            assert_eq!(service.pending_count(), 0);
        }

        {
            let queue = SegmentQueue::open(&temp.path().join("dropped"), &config, Arc::clone(&service)).unwrap();
            queue.append(b"x").unwrap();
        }
        assert_eq!(service.pending_count(), 0);
    }

    struct SlowFactory {
        inner: MappedSegmentFactory,
        delay: Duration,
    }

    impl SegmentFactory for SlowFactory {
        fn create(&self, path: &Path) -> LogResult<Segment> {
            thread::sleep(self.delay);
            self.inner.create(path)
        }
    }

    #[test]
    fn close_during_allocation_discards_segment() {
        let dir = tempdir().unwrap();
        let config = config(16);
        let factory = SlowFactory {
            inner: MappedSegmentFactory::new(16, false),
            delay: Duration::from_millis(200),
        };
        let service = Arc::new(AllocationService::with_factory(&config, Arc::new(factory)));
        service.start().unwrap();
        let queue = Arc::new(SegmentQueue::open(dir.path(), &config, Arc::clone(&service)).unwrap());

        let crossing = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get_writable_segment(true))
        };
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        queue.close().unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));

        let result = crossing.join().unwrap();
        assert!(matches!(result, Err(LogError::QueueClosed { .. })));
        assert_eq!(queue.segment_count(), 0);
        assert_eq!(service.pending_count(), 0);
    }

    #[test]
    fn direct_writers_do_not_break_queue_appends() {
        let (_dir, queue) = open_queue(8);
        let queue = Arc::new(queue);

        let direct: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..200 {
                        loop {
                            let segment = queue.get_writable_segment(true).unwrap().unwrap();
                            if segment.append(b"x").is_ok() {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        let appender = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..100 {
                    queue.append(b"abcde").unwrap();
                }
            })
        };

        appender.join().unwrap();
        for handle in direct {
            handle.join().unwrap();
        }

        // Every segment but the tail is full, so no bytes went missing.
        assert_eq!(queue.write_offset(), 2 * 200 + 100 * 5);
    }
}
