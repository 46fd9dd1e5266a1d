//! Profiling engine
//!
//! - [`Profiler`]: shared state and per-thread lifecycle
//! - [`ThreadProfiler`]: probe callbacks of one thread
//! - [`collaborators`]: the instrumentation and thread-selection seams

pub mod collaborators;
pub mod profiler;
pub mod thread;

pub use collaborators::{
    AllThreads, CountingInstrumentation, Instrumentation, ThreadFilter, ThreadOracle,
};
pub use profiler::Profiler;
pub use thread::{ThreadProfiler, ThreadSummary};
