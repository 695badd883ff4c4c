//! SegLog CLI
//!
//! Command-line tools for segmented append logs.
//!
//! # Commands
//!
//! - `append` - Append records to a log directory
//! - `list` - List segment files and their start offsets
//! - `dump` - Print the raw contents of one segment
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// SegLog command-line log tools.
#[derive(Parser)]
#[command(name = "seglog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append records to the log, starting a new stream at offset 0
    Append {
        /// Record to append (repeatable)
        #[arg(short, long = "data", required = true)]
        data: Vec<String>,

        /// Segment size in bytes
        #[arg(short, long, default_value_t = seglog_core::DEFAULT_SEGMENT_SIZE)]
        segment_size: u64,

        /// Allocation worker threads
        #[arg(long, default_value_t = seglog_core::DEFAULT_POOL_SIZE)]
        pool_size: usize,

        /// Allocation wait bound in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Zero existing segment files before reuse
        #[arg(long)]
        truncate: bool,
    },

    /// List segment files with their start offsets
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a segment's contents for debugging
    Dump {
        /// Segment file name (20-digit offset)
        #[arg(short, long)]
        segment: String,

        /// Drop trailing zero bytes from the output
        #[arg(short, long)]
        trim: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Append {
            data,
            segment_size,
            pool_size,
            timeout_ms,
            truncate,
        } => {
            let path = cli.path.ok_or("Log path required for append")?;
            let config = seglog_core::LogConfig::new()
                .segment_size(segment_size)
                .pool_size(pool_size)
                .allocation_timeout(Duration::from_millis(timeout_ms))
                .truncate_existing(truncate);
            commands::append::run(&path, &config, &data)?;
        }
        Commands::List { format } => {
            let path = cli.path.ok_or("Log path required for list")?;
            commands::list::run(&path, &format)?;
        }
        Commands::Dump { segment, trim } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            commands::dump::run(&path, &segment, trim)?;
        }
        Commands::Version => {
            println!("SegLog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SegLog Core v{}", seglog_core::VERSION);
        }
    }

    Ok(())
}
