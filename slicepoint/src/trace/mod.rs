//! Region-event trace replay
//!
//! - [`events`]: the trace line format
//! - [`replay`]: multi-threaded replay through the engine

pub mod events;
pub mod replay;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub use events::{parse_trace, BlockEvent, ThreadEvent, TraceEvent};
pub use replay::{replay, RunSummary, DEFAULT_CHANNEL_CAPACITY};

/// Read and parse a trace file
///
/// # Errors
/// Returns an error if the file cannot be read or holds a malformed line
pub fn read_trace(path: &Path) -> Result<Vec<TraceEvent>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace {}", path.display()))?;
    parse_trace(&content).with_context(|| format!("Malformed trace {}", path.display()))
}
