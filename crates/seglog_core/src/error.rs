//! Error types for SegLog core.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in segment, allocation, and queue operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write would extend past the end of the segment.
    #[error("write out of bounds: offset {offset}, len {len}, capacity {capacity}")]
    OutOfBounds {
        /// Requested write offset, relative to the segment start.
        offset: u64,
        /// Requested write length.
        len: usize,
        /// Segment capacity.
        capacity: u64,
    },

    /// Creating or mapping a segment file failed.
    #[error("allocation of {} failed: {message}", path.display())]
    AllocationFailed {
        /// Target segment file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The allocation did not complete within the configured bound.
    #[error("allocation of {} timed out after {timeout:?}", path.display())]
    AllocationTimeout {
        /// Target segment file.
        path: PathBuf,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The allocation service has not been started, or was shut down.
    #[error("allocation service is not running")]
    ServiceNotStarted,

    /// Syncing the mapping to disk failed.
    #[error("flush failed: {0}")]
    Flush(#[source] io::Error),

    /// Closing a segment failed; every step's error is kept.
    #[error("close failed with {} error(s): {}", errors.len(), join_errors(errors))]
    Close {
        /// Errors from the flush and unmap steps, in order.
        errors: Vec<LogError>,
    },

    /// The segment has been closed and its mapping released.
    #[error("segment is closed: {}", path.display())]
    SegmentClosed {
        /// Path of the closed segment.
        path: PathBuf,
    },

    /// The queue has been closed.
    #[error("segment queue is closed: {}", path.display())]
    QueueClosed {
        /// Directory of the closed queue.
        path: PathBuf,
    },

    /// A segment file name is not a valid offset name.
    #[error("invalid segment file name: {name}")]
    InvalidFileName {
        /// The offending name.
        name: String,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The log directory does not exist and was not to be created.
    #[error("log directory not found: {}", path.display())]
    DirectoryNotFound {
        /// The missing directory.
        path: PathBuf,
    },

    /// Another queue holds the log directory.
    #[error("log directory locked: {}", path.display())]
    DirectoryLocked {
        /// The locked directory.
        path: PathBuf,
    },
}

impl LogError {
    /// Creates an out-of-bounds error.
    pub fn out_of_bounds(offset: u64, len: usize, capacity: u64) -> Self {
        Self::OutOfBounds {
            offset,
            len,
            capacity,
        }
    }

    /// Creates an allocation failed error.
    pub fn allocation_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::AllocationFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an allocation timeout error.
    pub fn allocation_timeout(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::AllocationTimeout {
            path: path.into(),
            timeout,
        }
    }

    /// Creates a segment closed error.
    pub fn segment_closed(path: impl Into<PathBuf>) -> Self {
        Self::SegmentClosed { path: path.into() }
    }

    /// Creates a queue closed error.
    pub fn queue_closed(path: impl Into<PathBuf>) -> Self {
        Self::QueueClosed { path: path.into() }
    }

    /// Creates an invalid file name error.
    pub fn invalid_file_name(name: impl Into<String>) -> Self {
        Self::InvalidFileName { name: name.into() }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Collapses a list of step errors into a single result.
    ///
    /// An empty list is success; otherwise every error is kept in a
    /// [`LogError::Close`].
    pub fn aggregate(errors: Vec<LogError>) -> LogResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::Close { errors })
        }
    }

    /// Returns true if this is an allocation timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AllocationTimeout { .. })
    }
}

fn join_errors(errors: &[LogError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
