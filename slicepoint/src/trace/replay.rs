//! # Trace replay
//!
//! Drives the engine from a recorded region-event trace the way a live
//! instrumentation engine would: every target thread gets its own OS thread
//! that owns a [`ThreadProfiler`] and runs its probe callbacks. The dispatcher
//! reads events in trace order and hands them to the owning thread over a
//! bounded channel, so threads advance in parallel.
//!
//! ```text
//!   trace ──▶ dispatcher ──┬─ bounded(T0) ──▶ worker T0 ──▶ out.T.0.bb
//!                          ├─ bounded(T1) ──▶ worker T1 ──▶ out.T.1.bb
//!                          └─ module events ──▶ ModuleRegistry
//! ```
//!
//! A worker finishes its thread on a `finish` event or when the trace ends.
//! On error every worker is still drained and joined so vector files are
//! flushed before the error is reported.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;

use super::events::{BlockEvent, ThreadEvent, TraceEvent};
use crate::domain::{ProfilerError, ThreadId};
use crate::profiling::{Profiler, ThreadProfiler, ThreadSummary};
use crate::registry::Block;
use crate::slicing::EmissionPolicy;

/// Events buffered per thread before the dispatcher blocks
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Whole-run results, written as JSON with `--summary`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub threads: Vec<ThreadSummary>,
    pub blocks: usize,
    pub modules: usize,
    pub slice_starts: usize,
    pub probe_removals: usize,
}

impl RunSummary {
    #[must_use]
    pub fn collect(profiler: &Profiler, threads: Vec<ThreadSummary>, probe_removals: usize) -> Self {
        Self {
            threads,
            blocks: profiler.blocks().len(),
            modules: profiler.modules().all().len(),
            slice_starts: profiler.slice_starts().len(),
            probe_removals,
        }
    }
}

type WorkerResult = Result<Option<ThreadSummary>, ProfilerError>;

struct Worker {
    tx: Sender<ThreadEvent>,
    handle: JoinHandle<WorkerResult>,
}

/// Replay `events` through `profiler`
///
/// Returns the summaries of the profiled threads ordered by thread id.
///
/// # Errors
/// Returns an error if the trace is inconsistent (events for a thread that
/// never started, a thread id started twice, including after its finish) or
/// a worker fails
pub fn replay<I>(profiler: &Arc<Profiler>, events: I, channel_capacity: usize) -> Result<Vec<ThreadSummary>>
where
    I: IntoIterator<Item = TraceEvent>,
{
    let mut running: BTreeMap<ThreadId, Worker> = BTreeMap::new();
    let mut done: Vec<(ThreadId, JoinHandle<WorkerResult>)> = Vec::new();

    let dispatched = dispatch(profiler, events, channel_capacity, &mut running, &mut done);

    // Closing the remaining channels finishes threads without a finish event
    done.extend(running.into_iter().map(|(tid, worker)| (tid, worker.handle)));
    let joined = join_all(done);

    dispatched?;
    let mut summaries = joined?;
    summaries.sort_by_key(|summary| summary.tid);
    Ok(summaries)
}

fn dispatch<I>(
    profiler: &Arc<Profiler>,
    events: I,
    channel_capacity: usize,
    running: &mut BTreeMap<ThreadId, Worker>,
    done: &mut Vec<(ThreadId, JoinHandle<WorkerResult>)>,
) -> Result<()>
where
    I: IntoIterator<Item = TraceEvent>,
{
    let mut started = BTreeSet::new();
    for event in events {
        match event {
            TraceEvent::ModuleLoad { id, base, name } => profiler.module_loaded(id, name, base),
            TraceEvent::ModuleUnload(id) => profiler.module_unloaded(id),
            TraceEvent::ThreadStart(tid) => {
                // Thread ids are never reused within a run
                if !started.insert(tid) {
                    bail!("{tid} started twice");
                }
                let (tx, rx) = bounded(channel_capacity);
                let worker_profiler = Arc::clone(profiler);
                let handle = std::thread::Builder::new()
                    .name(format!("slicepoint-{tid}"))
                    .spawn(move || run_thread(&worker_profiler, tid, &rx))
                    .with_context(|| format!("Failed to spawn worker for {tid}"))?;
                running.insert(tid, Worker { tx, handle });
            }
            TraceEvent::Thread(tid, event) => {
                let finish = event == ThreadEvent::Finish;
                let worker = running
                    .get(&tid)
                    .with_context(|| format!("Trace event for {tid} before its start"))?;
                if worker.tx.send(event).is_err() {
                    // The worker already stopped on an error; join_all reports it
                    log::debug!("{tid} stopped early, dropping its events");
                }
                if finish {
                    if let Some(worker) = running.remove(&tid) {
                        done.push((tid, worker.handle));
                    }
                }
            }
        }
    }
    Ok(())
}

fn join_all(handles: Vec<(ThreadId, JoinHandle<WorkerResult>)>) -> Result<Vec<ThreadSummary>> {
    let mut summaries = Vec::new();
    let mut first_error = None;
    for (tid, handle) in handles {
        let outcome = handle
            .join()
            .map_err(|_| anyhow!("Worker for {tid} panicked"))
            .and_then(|result| result.with_context(|| format!("Profiling {tid} failed")));
        match outcome {
            Ok(Some(summary)) => summaries.push(summary),
            Ok(None) => {}
            Err(e) => {
                log::warn!("{e:#}");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(summaries),
    }
}

/// Body of one worker: the probe callbacks of thread `tid`
fn run_thread(profiler: &Arc<Profiler>, tid: ThreadId, events: &Receiver<ThreadEvent>) -> WorkerResult {
    let mut thread = profiler.thread_start(tid)?;
    if !thread.is_active() {
        // Drain so the dispatcher never blocks on an uninteresting thread
        for _ in events {}
        return Ok(None);
    }

    let mut probes = ProbeCache::default();
    let result = events.iter().take_while(|event| *event != ThreadEvent::Finish).try_for_each(
        |event| match event {
            ThreadEvent::Block(block) => {
                let block_ref = probes.resolve(profiler, &block)?;
                on_block(profiler, &mut thread, &block, &block_ref)
            }
            ThreadEvent::Memory { addr, agen } => {
                if profiler.counting_memory() {
                    thread.memory_access(addr, agen)?;
                }
                Ok(())
            }
            ThreadEvent::Rep { first } => {
                thread.count_rep_iteration(first);
                Ok(())
            }
            ThreadEvent::Finish => Ok(()),
        },
    );

    // Close the files on the error path too
    let summary = thread.finish();
    result?;
    summary
}

fn on_block(
    profiler: &Profiler,
    thread: &mut ThreadProfiler,
    event: &BlockEvent,
    block: &Arc<Block>,
) -> Result<(), ProfilerError> {
    // Capture probes exist only while some thread still lacks its first IP
    if profiler.wants_first_ip_probes() {
        thread.capture_first_ip(event.start, event.module)?;
    }
    // Stand-in for an external emission controller: emit at the next region
    if profiler.policy() == EmissionPolicy::External && thread.vector_pending() {
        thread.emit_pending_vector(event.start, event.module, 1)?;
    }
    thread.execute_block(block)
}

/// Regions already instrumented by this thread, as a probe would hold them
#[derive(Default)]
struct ProbeCache {
    blocks: HashMap<BlockEvent, Arc<Block>>,
}

impl ProbeCache {
    fn resolve(&mut self, profiler: &Profiler, event: &BlockEvent) -> Result<Arc<Block>, ProfilerError> {
        if let Some(block) = self.blocks.get(event) {
            return Ok(Arc::clone(block));
        }
        let block = profiler.register_block(
            event.start,
            event.end,
            event.size,
            event.instructions,
            event.module,
        )?;
        self.blocks.insert(*event, Arc::clone(&block));
        Ok(block)
    }
}
