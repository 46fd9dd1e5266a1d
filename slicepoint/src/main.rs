//! # slicepoint - Main Entry Point
//!
//! Replays a region-event trace through the profiling engine and writes one
//! vector file per profiled thread and profile.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Instant;

use slicepoint::cli::Args;
use slicepoint::domain::{ConfigError, ProfilerError};
use slicepoint::profiling::{
    AllThreads, CountingInstrumentation, Profiler, ThreadFilter, ThreadOracle,
};
use slicepoint::trace::{read_trace, replay, RunSummary};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let usage = err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || matches!(
                cause.downcast_ref::<ProfilerError>(),
                Some(ProfilerError::Config(_) | ProfilerError::ThreadCapacityExceeded { .. })
            )
    });
    if usage {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let config = args.profiler_config().context("Invalid configuration")?;
    let events = read_trace(&args.trace)?;

    if !quiet {
        println!("slicepoint v{}", env!("CARGO_PKG_VERSION"));
        println!("trace: {} ({} events)", args.trace.display(), events.len());
    }

    let probes = Arc::new(CountingInstrumentation::new());
    let oracle: Arc<dyn ThreadOracle> = match args.thread_filter() {
        Some(tids) => Arc::new(ThreadFilter::new(tids)),
        None => Arc::new(AllThreads),
    };

    let Some(profiler) = Profiler::activate(config, probes.clone(), oracle)? else {
        if !quiet {
            println!("no profile enabled, nothing to do");
        }
        return Ok(());
    };

    let started = Instant::now();
    let threads = replay(&profiler, events, args.channel_capacity)?;
    info!("Replay finished in {:.2?}", started.elapsed());

    if !quiet {
        for thread in &threads {
            println!(
                "T{}: {} slices, {} instructions -> {}",
                thread.tid,
                thread.slices,
                thread.instructions,
                thread
                    .files
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    if let Some(path) = &args.summary {
        let summary = RunSummary::collect(&profiler, threads, probes.removals());
        let file = File::create(path)
            .with_context(|| format!("Failed to create summary {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &summary).context("Failed to write summary")?;
        writer.flush().context("Failed to write summary")?;
        if !quiet {
            println!("saved: {}", path.display());
        }
    }

    Ok(())
}
