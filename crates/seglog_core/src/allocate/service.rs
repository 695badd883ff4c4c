//! Background segment allocation.

use crate::allocate::request::{AllocationRequest, Outcome};
use crate::config::LogConfig;
use crate::error::{LogError, LogResult};
use crate::segment::Segment;
use crate::stats::AllocationStats;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Builds segments on behalf of allocation workers.
pub trait SegmentFactory: Send + Sync {
    /// Opens or creates the file at `path` and maps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    fn create(&self, path: &Path) -> LogResult<Segment>;
}

/// The default factory: fixed-capacity memory-mapped files.
#[derive(Debug, Clone)]
pub struct MappedSegmentFactory {
    capacity: u64,
    truncate_existing: bool,
}

impl MappedSegmentFactory {
    /// Creates a factory for segments of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: u64, truncate_existing: bool) -> Self {
        Self {
            capacity,
            truncate_existing,
        }
    }
}

impl SegmentFactory for MappedSegmentFactory {
    fn create(&self, path: &Path) -> LogResult<Segment> {
        Segment::create(path, self.capacity, self.truncate_existing)
    }
}

type PendingMap = HashMap<PathBuf, Arc<AllocationRequest>>;

/// A running worker pool.
struct Pool {
    sender: Sender<Arc<AllocationRequest>>,
    // Held so submissions succeed even with zero workers.
    _receiver: Receiver<Arc<AllocationRequest>>,
    workers: Vec<JoinHandle<()>>,
}

/// Creates and maps segment files on a bounded pool of worker threads.
///
/// Requests are de-duplicated by target path: while an allocation for a
/// path is pending, further requests for that path wait on the same
/// allocation and receive the same segment.
///
/// One service can be shared by any number of
/// [`SegmentQueue`](crate::SegmentQueue)s through an `Arc`.
///
/// # Example
///
/// ```no_run
/// use seglog_core::{AllocationService, LogConfig};
/// use std::path::Path;
///
/// let service = AllocationService::new(&LogConfig::default()).unwrap();
/// service.start().unwrap();
///
/// let dir = Path::new("stream");
/// let segment = service
///     .request(&dir.join("00000000000000000000"), &dir.join("00000000000001048576"))
///     .unwrap();
/// segment.append(b"hello").unwrap();
/// ```
pub struct AllocationService {
    factory: Arc<dyn SegmentFactory>,
    pool_size: usize,
    timeout: Duration,
    pending: Mutex<PendingMap>,
    pool: Mutex<Option<Pool>>,
    stats: Arc<AllocationStats>,
}

impl AllocationService {
    /// Creates a service that maps segments of `config.segment_size` bytes.
    ///
    /// The service accepts requests only after [`AllocationService::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &LogConfig) -> LogResult<Self> {
        config.validate()?;
        let factory =
            MappedSegmentFactory::new(config.segment_size, config.truncate_existing);
        Ok(Self::with_factory(config, Arc::new(factory)))
    }

    /// Creates a service that builds segments with a custom factory.
    #[must_use]
    pub fn with_factory(config: &LogConfig, factory: Arc<dyn SegmentFactory>) -> Self {
        Self {
            factory,
            pool_size: config.pool_size,
            timeout: config.allocation_timeout,
            pending: Mutex::new(HashMap::new()),
            pool: Mutex::new(None),
            stats: Arc::new(AllocationStats::new()),
        }
    }

    /// Spawns the worker pool. Calling this on a running service does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn start(&self) -> LogResult<()> {
        let mut pool = self.pool.lock();
        if pool.is_some() {
            return Ok(());
        }

        let (sender, receiver) = unbounded::<Arc<AllocationRequest>>();
        let mut workers = Vec::with_capacity(self.pool_size);
        for id in 0..self.pool_size {
            let receiver = receiver.clone();
            let factory = Arc::clone(&self.factory);
            let stats = Arc::clone(&self.stats);
            let handle = thread::Builder::new()
                .name(format!("seglog-alloc-{id}"))
                .spawn(move || {
                    for request in receiver.iter() {
                        run_task(factory.as_ref(), &stats, &request);
                    }
                })?;
            workers.push(handle);
        }

        info!(workers = self.pool_size, timeout = ?self.timeout, "allocation service started");
        *pool = Some(Pool {
            sender,
            _receiver: receiver,
            workers,
        });
        Ok(())
    }

    /// Returns true between [`start`](Self::start) and
    /// [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// Returns the segment at `path`, allocating it if needed, and submits a
    /// look-ahead allocation for `lookahead` without waiting on it.
    ///
    /// Waits at most the configured allocation timeout. On completion the
    /// request is dropped from the pending set, so the same path can be
    /// requested again from scratch later. A pending entry that already
    /// failed is never joined; it is replaced by a new attempt.
    ///
    /// # Errors
    ///
    /// - [`LogError::ServiceNotStarted`] before `start` or after `shutdown`
    /// - [`LogError::AllocationTimeout`] if the wait bound elapses
    /// - [`LogError::AllocationFailed`] if the worker could not build the
    ///   segment
    pub fn request(&self, path: &Path, lookahead: &Path) -> LogResult<Arc<Segment>> {
        let request = {
            let pool = self.pool.lock();
            let pool = pool.as_ref().ok_or(LogError::ServiceNotStarted)?;
            self.stats.record_request();
            let mut pending = self.pending.lock();

            // A failed entry is replaced so the path gets a fresh attempt.
            let existing = pending
                .get(path)
                .filter(|request| !request.is_failed())
                .cloned();
            let request = match existing {
                Some(existing) => {
                    self.stats.record_deduplicated();
                    debug!(path = %path.display(), "joining pending allocation");
                    existing
                }
                None => {
                    let request = AllocationRequest::new(path);
                    submit(pool, &mut pending, &request)?;
                    request
                }
            };

            let reusable = pending
                .get(lookahead)
                .is_some_and(|request| !request.is_failed());
            if !reusable {
                let next = AllocationRequest::new(lookahead);
                match submit(pool, &mut pending, &next) {
                    Ok(()) => {
                        self.stats.record_lookahead();
                        debug!(path = %lookahead.display(), "look-ahead allocation submitted");
                    }
                    Err(e) => {
                        warn!(path = %lookahead.display(), error = %e, "look-ahead allocation not submitted");
                    }
                }
            }

            request
        };

        let Some(outcome) = request.wait(self.timeout) else {
            self.stats.record_timeout();
            warn!(path = %path.display(), timeout = ?self.timeout, "allocation timed out");
            return Err(LogError::allocation_timeout(path, self.timeout));
        };

        self.remove_pending(&request);
        outcome.map_err(|message| LogError::allocation_failed(path, message))
    }

    /// Drops the pending allocation for `path`, if any.
    ///
    /// Queues call this for look-ahead paths they will never claim. A
    /// segment that is already built is closed; one still being built is
    /// released when its worker finishes. Returns true if an entry was
    /// removed.
    pub fn release(&self, path: &Path) -> bool {
        let Some(request) = self.pending.lock().remove(path) else {
            return false;
        };

        if let Some(segment) = request.ready_segment() {
            if let Err(e) = segment.close() {
                warn!(path = %path.display(), error = %e, "released segment closed with errors");
            }
        }
        debug!(path = %path.display(), done = request.is_done(), "pending allocation released");
        true
    }

    /// Number of allocations submitted and not yet claimed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns the allocation counters.
    #[must_use]
    pub fn stats(&self) -> &AllocationStats {
        &self.stats
    }

    /// Stops accepting requests, lets workers drain the queue, and joins
    /// them. Unclaimed look-ahead segments are released.
    pub fn shutdown(&self) {
        let Some(pool) = self.pool.lock().take() else {
            return;
        };

        let Pool {
            sender,
            _receiver: receiver,
            workers,
        } = pool;
        drop(sender);
        drop(receiver);

        for worker in workers {
            if worker.join().is_err() {
                error!("allocation worker exited abnormally");
            }
        }

        let unclaimed = std::mem::take(&mut *self.pending.lock());
        let ready = unclaimed.values().filter(|r| r.is_done()).count();
        info!(unclaimed = unclaimed.len(), ready, "allocation service stopped");
    }

    fn remove_pending(&self, request: &Arc<AllocationRequest>) {
        let mut pending = self.pending.lock();
        if pending
            .get(request.path())
            .is_some_and(|current| Arc::ptr_eq(current, request))
        {
            pending.remove(request.path());
        }
    }
}

impl Drop for AllocationService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AllocationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationService")
            .field("pool_size", &self.pool_size)
            .field("timeout", &self.timeout)
            .field("running", &self.is_running())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Registers `request` as pending and hands it to the pool.
fn submit(
    pool: &Pool,
    pending: &mut PendingMap,
    request: &Arc<AllocationRequest>,
) -> LogResult<()> {
    pending.insert(request.path().to_path_buf(), Arc::clone(request));
    if pool.sender.send(Arc::clone(request)).is_err() {
        pending.remove(request.path());
        return Err(LogError::allocation_failed(
            request.path(),
            "allocation pool is closed",
        ));
    }
    Ok(())
}

/// Builds one segment and completes its request. Panics are contained so
/// the worker keeps serving.
fn run_task(factory: &dyn SegmentFactory, stats: &AllocationStats, request: &AllocationRequest) {
    let path = request.path();
    debug!(path = %path.display(), "allocating segment");

    let outcome: Outcome = match panic::catch_unwind(AssertUnwindSafe(|| factory.create(path))) {
        Ok(Ok(segment)) => {
            stats.record_created();
            Ok(Arc::new(segment))
        }
        Ok(Err(e)) => {
            stats.record_failure();
            error!(path = %path.display(), error = %e, "segment allocation failed");
            Err(e.to_string())
        }
        Err(payload) => {
            stats.record_panic();
            let message = panic_message(payload.as_ref());
            error!(path = %path.display(), panic = %message, "allocation worker panicked");
            Err(format!("allocation worker panicked: {message}"))
        }
    };

    request.complete(outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
