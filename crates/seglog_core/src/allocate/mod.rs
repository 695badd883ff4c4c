//! Asynchronous segment allocation.
//!
//! Creating a file and mapping it is slow compared to an append, so it is
//! moved off the write path: an [`AllocationService`] builds segments on a
//! bounded pool of worker threads, and every request also submits the
//! segment after it so the next boundary crossing finds it ready.

mod request;
mod service;

pub use service::{AllocationService, MappedSegmentFactory, SegmentFactory};
