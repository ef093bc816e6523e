//! CLI entrypoint for heapreplay.

use std::path::PathBuf;

use clap::Parser;
use heapreplay_core::ReplayMode;
use heapreplay_harness::{RunOptions, execute};

/// Replay an allocation trace against a real allocator.
#[derive(Debug, Parser)]
#[command(name = "heapreplay")]
#[command(about = "Replay recorded allocation traces under explicit, gc or oracle reclamation")]
struct Cli {
    /// Trace file (oracle CSV or structured records).
    trace: PathBuf,
    /// Reclamation mode: explicit, gc or oracle.
    mode: String,
    /// Allocator backend; unknown names fall back to "standard".
    #[arg(long, default_value = heapreplay_alloc::BASELINE_BACKEND)]
    allocator: String,
    /// GC byte threshold (default 10 MiB).
    #[arg(long)]
    gc_threshold: Option<u64>,
    /// GC allocation-count threshold (default 1000).
    #[arg(long)]
    gc_alloc_count: Option<u64>,
    /// Print allocator call counters after the summary.
    #[arg(long)]
    allocator_stats: bool,
    /// Cap outstanding backend bytes.
    #[arg(long)]
    heap_limit: Option<u64>,
    /// Read-sample the working set every N allocations.
    #[arg(long)]
    sample_reads: Option<u64>,
    /// Structured JSONL log output path.
    #[arg(long)]
    log: Option<PathBuf>,
    /// JSON report output path.
    #[arg(long)]
    json: Option<PathBuf>,
    /// Echo warnings and collection notices to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mode: ReplayMode = cli.mode.parse()?;

    let options = RunOptions {
        trace: cli.trace,
        mode,
        allocator: cli.allocator,
        gc_byte_threshold: cli.gc_threshold,
        gc_alloc_count: cli.gc_alloc_count,
        allocator_stats: cli.allocator_stats,
        heap_limit: cli.heap_limit,
        sample_reads: cli.sample_reads,
        log_path: cli.log,
        json_path: cli.json,
        verbose: cli.verbose,
    };
    let artifacts = execute(&options)?;

    if options.verbose {
        for notice in &artifacts.notices {
            eprintln!("{notice}");
        }
        if let Some(path) = &options.log_path {
            eprintln!("wrote {} log lines to {}", artifacts.log_lines, path.display());
        }
    }
    print!("{}", artifacts.summary);
    Ok(())
}
