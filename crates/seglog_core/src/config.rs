//! Log configuration.

use crate::error::{LogError, LogResult};
use std::time::Duration;

/// Default capacity of a single segment file (1 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 1 << 20;

/// Default number of allocation worker threads.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default bound on waiting for a segment allocation.
pub const DEFAULT_ALLOCATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a segment queue and its allocation service.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Fixed capacity of every segment file, in bytes.
    pub segment_size: u64,

    /// Number of allocation worker threads.
    pub pool_size: usize,

    /// How long a requester waits for a segment before giving up.
    pub allocation_timeout: Duration,

    /// Whether an existing segment file is truncated when it is allocated.
    pub truncate_existing: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            allocation_timeout: DEFAULT_ALLOCATION_TIMEOUT,
            truncate_existing: false,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment capacity.
    #[must_use]
    pub const fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the number of allocation workers.
    #[must_use]
    pub const fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the allocation wait bound.
    #[must_use]
    pub const fn allocation_timeout(mut self, timeout: Duration) -> Self {
        self.allocation_timeout = timeout;
        self
    }

    /// Sets whether existing segment files are truncated on allocation.
    #[must_use]
    pub const fn truncate_existing(mut self, value: bool) -> Self {
        self.truncate_existing = value;
        self
    }

    /// Checks that the configuration can be used.
    ///
    /// A pool size of zero is accepted: every allocation then times out,
    /// which is useful for exercising the timeout path.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] if the segment size is zero or
    /// does not fit in the address space.
    pub fn validate(&self) -> LogResult<()> {
        if self.segment_size == 0 {
            return Err(LogError::invalid_config("segment_size must be non-zero"));
        }
        if usize::try_from(self.segment_size).is_err() {
            return Err(LogError::invalid_config(format!(
                "segment_size {} exceeds addressable memory",
                self.segment_size
            )));
        }
        Ok(())
    }
}
