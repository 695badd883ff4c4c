//! CLI command implementations.

pub mod append;
pub mod dump;
pub mod list;
