//! Allocation statistics.
//!
//! Counters are updated by requesters and workers of an
//! [`AllocationService`](crate::AllocationService) and can be read at any
//! time.
//!
//! ```rust,ignore
//! let stats = service.stats().snapshot();
//! println!("created: {}, timeouts: {}", stats.segments_created, stats.timeouts);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Allocation counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct AllocationStats {
    /// Calls to `request`.
    requests: AtomicU64,
    /// Requests that joined an allocation already pending.
    deduplicated: AtomicU64,
    /// Look-ahead allocations submitted.
    lookaheads: AtomicU64,
    /// Segments successfully created and mapped.
    segments_created: AtomicU64,
    /// Creations that returned an error.
    failures: AtomicU64,
    /// Waits that hit the timeout.
    timeouts: AtomicU64,
    /// Worker tasks that panicked.
    panics: AtomicU64,
}

impl AllocationStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lookahead(&self) {
        self.lookaheads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_created(&self) {
        self.segments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of calls to `request`.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Returns the number of requests that joined a pending allocation.
    pub fn deduplicated(&self) -> u64 {
        self.deduplicated.load(Ordering::Relaxed)
    }

    /// Returns the number of look-ahead allocations submitted.
    pub fn lookaheads(&self) -> u64 {
        self.lookaheads.load(Ordering::Relaxed)
    }

    /// Returns the number of segments created.
    ///
    /// Each unit is one file open plus one mapping.
    pub fn segments_created(&self) -> u64 {
        self.segments_created.load(Ordering::Relaxed)
    }

    /// Returns the number of failed creations.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the number of timed-out waits.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Returns the number of worker panics.
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests(),
            deduplicated: self.deduplicated(),
            lookaheads: self.lookaheads(),
            segments_created: self.segments_created(),
            failures: self.failures(),
            timeouts: self.timeouts(),
            panics: self.panics(),
        }
    }
}

/// A point-in-time copy of [`AllocationStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Calls to `request`.
    pub requests: u64,
    /// Requests that joined a pending allocation.
    pub deduplicated: u64,
    /// Look-ahead allocations submitted.
    pub lookaheads: u64,
    /// Segments created.
    pub segments_created: u64,
    /// Failed creations.
    pub failures: u64,
    /// Timed-out waits.
    pub timeouts: u64,
    /// Worker panics.
    pub panics: u64,
}
