//! List command implementation.

use seglog_core::dir::list_segments;
use serde::Serialize;
use std::path::Path;

/// Segment file representation for output.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// File name.
    pub name: String,
    /// Stream offset of the first byte.
    pub start_offset: u64,
    /// File size in bytes.
    pub size: u64,
}

/// Runs the list command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err("Log directory not found".into());
    }

    let segments = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&segments)?);
        }
        _ => {
            print_text_output(path, &segments);
        }
    }

    Ok(())
}

/// Reads the segment files of `path` in offset order.
pub fn collect(path: &Path) -> Result<Vec<SegmentInfo>, Box<dyn std::error::Error>> {
    let segments = list_segments(path)?
        .into_iter()
        .map(|file| SegmentInfo {
            name: seglog_core::segment_file_name(file.start_offset),
            start_offset: file.start_offset,
            size: file.size,
        })
        .collect();
    Ok(segments)
}

fn print_text_output(path: &Path, segments: &[SegmentInfo]) {
    println!("Log directory: {}", path.display());
    println!("Segments: {}", segments.len());
    println!();

    for segment in segments {
        println!("  {}  {:>12} bytes", segment.name, segment.size);
    }

    let total: u64 = segments.iter().map(|s| s.size).sum();
    println!();
    println!("Total mapped size: {total} bytes");
}
