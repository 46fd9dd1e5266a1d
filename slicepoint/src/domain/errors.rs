//! Structured error types for slicepoint
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every variant here is fatal for the run; recoverable conditions (inert
//! engine, uninteresting threads) are not errors.

use std::path::PathBuf;

use super::types::{Address, ThreadId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Thread {tid} exceeds the thread capacity of {capacity}; raise max-thread-count")]
    ThreadCapacityExceeded { tid: ThreadId, capacity: usize },

    #[error("Invalid block key: end {end} precedes start {start}")]
    InvalidBlockKey { start: Address, end: Address },

    #[error("Thread {0} was already started; thread ids cannot be reused")]
    ThreadAlreadyStarted(ThreadId),

    #[error("Memory access on thread {0} but the locality profile is not enabled")]
    MemoryAccessWithoutLocality(ThreadId),

    #[error("Failed to open vector file {path}: {source}")]
    OutputOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not open length file {path}: {source}")]
    LengthFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Empty length field in {path} at line {line}")]
    EmptyLengthRecord { path: PathBuf, line: usize },

    #[error("Invalid slice length `{value}` in {path} at line {line}")]
    InvalidLength { path: PathBuf, line: usize, value: String },

    #[error("Invalid slice length `{value}` in {path} at line {line}: larger than {max}", max = i64::MAX)]
    LengthTooLarge { path: PathBuf, line: usize, value: u64 },

    #[error("Slice size must be greater than zero")]
    ZeroSliceSize,

    #[error("Slice size {0} is larger than {max}", max = i64::MAX)]
    SliceSizeTooLarge(u64),

    #[error("Max thread count must be greater than zero")]
    ZeroThreadCapacity,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Malformed line in a region-event trace
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TraceError {
    #[error("line {line}: unknown event `{event}`")]
    UnknownEvent { line: usize, event: String },

    #[error("line {line}: missing {field}")]
    MissingField { line: usize, field: &'static str },

    #[error("line {line}: invalid {field} `{value}`")]
    InvalidField { line: usize, field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_display() {
        let err = ProfilerError::ThreadCapacityExceeded { tid: ThreadId(8), capacity: 8 };
        assert_eq!(
            err.to_string(),
            "Thread T8 exceeds the thread capacity of 8; raise max-thread-count"
        );
    }

    #[test]
    fn test_length_record_error() {
        let err = ConfigError::EmptyLengthRecord { path: PathBuf::from("/tmp/lengths"), line: 3 };
        assert!(err.to_string().contains("/tmp/lengths"));
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: ProfilerError = ConfigError::ZeroSliceSize.into();
        assert_eq!(err.to_string(), "Slice size must be greater than zero");
    }

    #[test]
    fn test_restart_error_display() {
        let err = ProfilerError::ThreadAlreadyStarted(ThreadId(3));
        assert_eq!(err.to_string(), "Thread T3 was already started; thread ids cannot be reused");
    }

    #[test]
    fn test_trace_error_names_line() {
        let err = TraceError::InvalidField { line: 7, field: "tid", value: "x".into() };
        assert_eq!(err.to_string(), "line 7: invalid tid `x`");
    }
}
