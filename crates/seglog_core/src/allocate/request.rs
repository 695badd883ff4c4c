//! A single pending segment allocation.

use crate::segment::Segment;
use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Result of a finished allocation. Failures are kept as text so every
/// waiter can receive its own copy.
pub(crate) type Outcome = Result<Arc<Segment>, String>;

/// A request to create and map one segment file.
///
/// The outcome is set exactly once by a worker; any number of requesters
/// can wait on it.
#[derive(Debug)]
pub struct AllocationRequest {
    path: PathBuf,
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl AllocationRequest {
    /// Creates a new, incomplete request for `path`.
    pub fn new(path: &Path) -> Arc<Self> {
        Arc::new(Self {
            path: path.to_path_buf(),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    /// Returns the target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once a worker has completed the request.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// Returns true once the request has completed with an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(*self.outcome.lock(), Some(Err(_)))
    }

    /// Returns the segment if the request completed successfully.
    pub(crate) fn ready_segment(&self) -> Option<Arc<Segment>> {
        match &*self.outcome.lock() {
            Some(Ok(segment)) => Some(Arc::clone(segment)),
            _ => None,
        }
    }

    /// Stores the outcome and wakes all waiters.
    ///
    /// Returns false, leaving the first outcome in place, if the request was
    /// already complete.
    pub(crate) fn complete(&self, outcome: Outcome) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        drop(slot);
        self.done.notify_all();
        true
    }

    /// Waits up to `timeout` for the outcome. Returns `None` on timeout.
    pub(crate) fn wait(&self, timeout: Duration) -> Option<Outcome> {
        let mut slot = self.outcome.lock();
        self.done
            .wait_while_for(&mut slot, |outcome| outcome.is_none(), timeout);
        slot.clone()
    }
}
