//! Seams to the components that drive the engine
//!
//! The engine never inserts probes or decides which threads matter. It asks
//! these two traits instead; the trace driver and the tests supply their own
//! implementations.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::ThreadId;

/// The binary-instrumentation side
pub trait Instrumentation: Send + Sync {
    /// Drop every inserted probe; code is re-instrumented on its next
    /// execution, which lets the probe set follow [`super::Profiler::wants_first_ip_probes`]
    fn remove_instrumentation(&self);
}

/// Decides once per thread whether it is profiled
pub trait ThreadOracle: Send + Sync {
    fn is_interesting(&self, tid: ThreadId) -> bool;
}

/// Every thread is interesting
#[derive(Debug, Clone, Copy, Default)]
pub struct AllThreads;

impl ThreadOracle for AllThreads {
    fn is_interesting(&self, _tid: ThreadId) -> bool {
        true
    }
}

/// Only the listed threads are interesting
#[derive(Debug, Clone, Default)]
pub struct ThreadFilter {
    threads: BTreeSet<ThreadId>,
}

impl ThreadFilter {
    pub fn new(threads: impl IntoIterator<Item = ThreadId>) -> Self {
        Self { threads: threads.into_iter().collect() }
    }
}

impl ThreadOracle for ThreadFilter {
    fn is_interesting(&self, tid: ThreadId) -> bool {
        self.threads.contains(&tid)
    }
}

/// Instrumentation stand-in that only counts removal requests
#[derive(Debug, Default)]
pub struct CountingInstrumentation {
    removals: AtomicUsize,
}

impl CountingInstrumentation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::Relaxed)
    }
}

impl Instrumentation for CountingInstrumentation {
    fn remove_instrumentation(&self) {
        let total = self.removals.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!("Instrumentation removal requested ({total} so far)");
    }
}
