//! # slicepoint - Slice Profiler for Simulation Point Selection
//!
//! slicepoint partitions the execution of every target thread into
//! contiguous instruction **slices** and writes, at each slice boundary, the
//! vectors that summarize the slice: a basic-block vector (which code regions
//! ran and how often) and optionally a memory-locality vector (a reuse
//! distance histogram). Clustering those vectors into simulation points is
//! left to downstream tools.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            Instrumentation engine / trace replay                │
//! │      (region probes, memory probes, thread start/finish)        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ callbacks, one ThreadProfiler per thread
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    slicepoint (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Slicing    │──▶│  Profiling   │──▶│   Profiles   │         │
//! │  │ (countdown)  │   │ (multiplexer)│   │ (bbv / ldv)  │         │
//! │  └──────────────┘   └──────┬───────┘   └──────┬───────┘         │
//! │                            │                  │                 │
//! │                            ▼                  ▼                 │
//! │                     ┌──────────────┐   ┌──────────────┐         │
//! │                     │   Registry   │   │ <prefix>.T.* │         │
//! │                     │ (blocks, ids)│   │ vector files │         │
//! │                     └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`registry`]: code regions, per-thread execution counters, modules and
//!   the set of slice-start addresses
//! - [`slicing`]: the per-thread slice countdown and emission policies
//! - [`profiles`]: frequency and locality vectors and their output files
//! - [`profiling`]: the engine entry points (`Profiler`, `ThreadProfiler`)
//!   and the instrumentation / thread selection seams
//! - [`trace`]: textual region-event traces and their multi-threaded replay
//! - [`config`]: the immutable engine configuration and slice length files
//! - [`cli`]: command-line argument parsing
//! - [`domain`]: core domain types (`ThreadId`, `BlockId`, `Address`) and errors
//!
//! ## Concurrency
//!
//! Probe callbacks run on the target's own threads. Every per-thread counter
//! is a slot indexed by thread id and written only by that thread, so the
//! counting path takes no lock. Only the block arena (on registration), the
//! module registry and the slice-start set are shared behind locks.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Basic-block vectors with 100M-instruction slices
//! slicepoint --trace app.trace -o out/app
//!
//! # Both profiles, slice lengths from a file, JSON run summary
//! slicepoint --trace app.trace --locality --length-file regions.txt --summary run.json
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod profiles;
pub mod profiling;
pub mod registry;
pub mod slicing;
pub mod trace;
