//! # SegLog Core
//!
//! A segmented, memory-mapped append log.
//!
//! A logical byte stream is stored as a sequence of fixed-size segment files
//! in one directory. Each file is memory-mapped and named after the stream
//! offset of its first byte.
//!
//! This crate provides:
//! - [`Segment`] - one mapped file with write and flush cursors
//! - [`AllocationService`] - a worker pool that creates and maps segment
//!   files off the write path, with request de-duplication and a bounded wait
//! - [`SegmentQueue`] - the ordered segments of one directory, handing out
//!   the writable segment and pre-allocating the next one
//!
//! ## Example
//!
//! ```no_run
//! use seglog_core::{AllocationService, LogConfig, SegmentQueue};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let config = LogConfig::new().segment_size(1 << 20);
//! let service = Arc::new(AllocationService::new(&config).unwrap());
//! service.start().unwrap();
//!
//! let queue = SegmentQueue::open(Path::new("stream"), &config, service).unwrap();
//! let offset = queue.append(b"hello world").unwrap();
//! assert_eq!(offset, 0);
//! queue.flush().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod allocate;
mod config;
pub mod dir;
mod error;
mod queue;
pub mod segment;
mod stats;

pub use allocate::{AllocationService, MappedSegmentFactory, SegmentFactory};
pub use config::{LogConfig, DEFAULT_ALLOCATION_TIMEOUT, DEFAULT_POOL_SIZE, DEFAULT_SEGMENT_SIZE};
pub use dir::{LogDir, SegmentFile};
pub use error::{LogError, LogResult};
pub use queue::SegmentQueue;
pub use segment::{segment_file_name, IntWidth, Segment};
pub use stats::{AllocationStats, StatsSnapshot};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
