//! Append command implementation.

use seglog_core::{AllocationService, LogConfig, SegmentQueue};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Where one appended record landed.
#[derive(Debug, Serialize)]
pub struct AppendedRecord {
    /// Stream offset of the record's first byte.
    pub offset: u64,
    /// Record length in bytes.
    pub len: usize,
}

/// Runs the append command.
pub fn run(
    path: &Path,
    config: &LogConfig,
    data: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let (records, flushed) = append_records(path, config, data)?;

    for record in &records {
        println!("{:>20}  {} bytes", record.offset, record.len);
    }
    println!("Flushed through offset {flushed}");

    Ok(())
}

/// Appends each record and flushes; returns the placements and the
/// flush watermark.
pub fn append_records(
    path: &Path,
    config: &LogConfig,
    data: &[String],
) -> Result<(Vec<AppendedRecord>, u64), Box<dyn std::error::Error>> {
    let service = Arc::new(AllocationService::new(config)?);
    service.start()?;

    let queue = SegmentQueue::open(path, config, Arc::clone(&service))?;
    let mut records = Vec::with_capacity(data.len());
    for record in data {
        let offset = queue.append(record.as_bytes())?;
        records.push(AppendedRecord {
            offset,
            len: record.len(),
        });
    }

    let flushed = queue.flush()?;
    tracing::info!(
        records = records.len(),
        segments = queue.segment_count(),
        flushed,
        "append complete"
    );
    queue.close()?;
    service.shutdown();

    Ok((records, flushed))
}
