//! Log directory management.
//!
//! Each logical stream lives in its own directory:
//!
//! ```text
//! <log_dir>/
//! ├─ LOCK                   # Advisory lock held by the owning queue
//! ├─ 00000000000000000000   # Segment starting at offset 0
//! └─ 00000000000001048576   # Segment starting at offset 1 MiB
//! ```
//!
//! The LOCK file keeps two queues from mapping the same segments.

use crate::error::{LogError, LogResult};
use crate::segment::{parse_segment_file_name, segment_file_name};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";

/// Name of the resource directory under the user directory.
const RESOURCE_DIR: &str = "resources";

/// A segment file found in a log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    /// Logical offset of the segment's first byte.
    pub start_offset: u64,
    /// Full path of the file.
    pub path: PathBuf,
    /// Size of the file on disk.
    pub size: u64,
}

/// An exclusively locked log directory.
#[derive(Debug)]
pub struct LogDir {
    path: PathBuf,
    _lock_file: File,
}

impl LogDir {
    /// Opens a log directory and takes its lock, creating the directory
    /// first when `create_if_missing` is set.
    ///
    /// # Errors
    ///
    /// - [`LogError::DirectoryNotFound`] if the directory is missing and
    ///   `create_if_missing` is false
    /// - [`LogError::InvalidConfig`] if the path exists but is not a
    ///   directory
    /// - [`LogError::DirectoryLocked`] if another owner holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> LogResult<Self> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return Err(LogError::invalid_config(format!(
                    "log path is not a directory: {}",
                    path.display()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && create_if_missing => {
                fs::create_dir_all(path)?;
                debug!(path = %path.display(), "log directory created");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LogError::DirectoryNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| LogError::DirectoryLocked {
                path: path.to_path_buf(),
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the segment starting at `offset`.
    #[must_use]
    pub fn segment_path(&self, offset: u64) -> PathBuf {
        self.path.join(segment_file_name(offset))
    }

    /// Lists the segment files in this directory.
    pub fn list_segments(&self) -> LogResult<Vec<SegmentFile>> {
        list_segments(&self.path)
    }
}

/// Lists the segment files in `path` in offset order.
///
/// Files whose names are not segment names (such as `LOCK`) are skipped.
/// No lock is taken.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_segments(path: &Path) -> LogResult<Vec<SegmentFile>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Ok(start_offset) = parse_segment_file_name(&name) else {
            continue;
        };
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        segments.push(SegmentFile {
            start_offset,
            path: entry.path(),
            size: metadata.len(),
        });
    }
    segments.sort_by_key(|s| s.start_offset);
    Ok(segments)
}

/// Returns the parent of the current working directory.
///
/// # Errors
///
/// Returns an error if the working directory cannot be read.
pub fn user_dir() -> LogResult<PathBuf> {
    let current = std::env::current_dir()?;
    Ok(current
        .parent()
        .map_or_else(|| current.clone(), Path::to_path_buf))
}

/// Returns the `resources` directory under [`user_dir`].
///
/// # Errors
///
/// Returns an error if the working directory cannot be read.
pub fn resource_dir() -> LogResult<PathBuf> {
    Ok(user_dir()?.join(RESOURCE_DIR))
}
