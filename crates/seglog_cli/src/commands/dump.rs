//! Dump command implementation.

use seglog_core::segment::parse_segment_file_name;
use seglog_core::Segment;
use std::fs;
use std::path::Path;

/// Runs the dump command.
pub fn run(path: &Path, segment: &str, trim: bool) -> Result<(), Box<dyn std::error::Error>> {
    let text = dump_segment(path, segment, trim)?;
    println!("{text}");
    Ok(())
}

/// Maps an existing segment file and returns its debug dump.
///
/// The file is mapped at its current size and never truncated.
pub fn dump_segment(
    path: &Path,
    segment: &str,
    trim: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    parse_segment_file_name(segment)?;

    let file_path = path.join(segment);
    if !file_path.is_file() {
        return Err(format!("Segment not found: {}", file_path.display()).into());
    }

    let size = fs::metadata(&file_path)?.len();
    if size == 0 {
        return Ok(String::new());
    }

    let mapped = Segment::create(&file_path, size, false)?;
    let mut text = mapped.debug_dump()?;
    mapped.close()?;

    if trim {
        let kept = text.trim_end_matches('\0').len();
        text.truncate(kept);
    }
    Ok(text)
}
