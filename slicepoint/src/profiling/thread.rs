//! Per-thread profiling handle
//!
//! A [`ThreadProfiler`] is owned by the thread it profiles and receives that
//! thread's probe callbacks. It never touches another thread's counter slots,
//! so the callbacks take no lock apart from the registry read lock a marker
//! lookup needs.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use slicepoint_common::Record;

use super::profiler::Profiler;
use crate::domain::{Address, ModuleId, ProfilerError, ThreadId};
use crate::profiles::{SliceEnd, ThreadEnd, ThreadProfile};
use crate::registry::Block;
use crate::slicing::{EmissionPolicy, FirstMarker, SliceController, SlicePhase};

/// What a thread produced, returned by [`ThreadProfiler::finish`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadSummary {
    pub tid: u32,
    /// Emitted slice vectors, including a trailing partial one
    pub slices: u64,
    /// Instructions accounted to emitted slices
    pub instructions: u64,
    pub rep_iterations: u64,
    pub files: Vec<PathBuf>,
}

struct ActiveThread {
    profiler: Arc<Profiler>,
    controller: SliceController,
    profiles: Vec<ThreadProfile>,
    previous: Option<Arc<Block>>,
}

/// Probe callbacks for one thread
///
/// An inert handle (uninteresting thread) accepts every callback and does
/// nothing.
pub struct ThreadProfiler {
    tid: ThreadId,
    state: Option<ActiveThread>,
}

impl ThreadProfiler {
    pub(super) fn inert(tid: ThreadId) -> Self {
        Self { tid, state: None }
    }

    pub(super) fn active(
        tid: ThreadId,
        profiler: Arc<Profiler>,
        controller: SliceController,
        profiles: Vec<ThreadProfile>,
    ) -> Self {
        Self {
            tid,
            state: Some(ActiveThread { profiler, controller, profiles, previous: None }),
        }
    }

    #[must_use]
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    /// Whether this thread is profiled and not finished yet
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    #[must_use]
    pub fn phase(&self) -> Option<SlicePhase> {
        self.state.as_ref().map(|state| state.controller.phase())
    }

    /// Record the thread's first instruction pointer
    ///
    /// Only the first call per thread counts; later calls come from capture
    /// probes that fired before their removal took effect.
    ///
    /// # Errors
    /// Returns an error if the slice-start record cannot be written
    pub fn capture_first_ip(&mut self, ip: Address, module: ModuleId) -> Result<(), ProfilerError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        if !state.profiler.config().emit_first_slice
            || !state.controller.record_first_marker(FirstMarker { address: ip, module })
        {
            return Ok(());
        }

        log::debug!("{} first IP {} in {}", self.tid, ip, module);
        state.profiler.slice_starts().insert(ip);
        let record = Record::SliceStart { address: ip.0, module: module.0, count: 1 };
        for profile in &mut state.profiles {
            profile.write_slice_start(&record)?;
        }
        state.profiler.slot_recorded_first_ip(self.tid);
        Ok(())
    }

    /// Entry probe of a code region
    ///
    /// Emits the vector of a slice that ended at the previous region when
    /// emission is deferred. The marker is this region's start, counting the
    /// execution that is about to happen.
    ///
    /// # Errors
    /// Returns an error if a vector cannot be written
    pub fn block_entry(&mut self, block: &Block) -> Result<(), ProfilerError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        if state.profiler.policy() == EmissionPolicy::Deferred && state.controller.take_pending() {
            let count = block.cumulative_count(self.tid) + 1;
            state.close_slice(self.tid, block.key().start(), block.module(), count)?;
        }
        Ok(())
    }

    /// Exit probe of a code region: count it and advance the slice timer
    ///
    /// # Errors
    /// Returns an error if a vector cannot be written
    pub fn block_exit(&mut self, block: &Arc<Block>) -> Result<(), ProfilerError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        state.profiler.blocks().record_execution(self.tid, block, state.previous.as_deref());
        state.previous = Some(Arc::clone(block));

        if !state.controller.advance(block.arena_index(), block.static_instructions()) {
            return Ok(());
        }
        match state.profiler.policy() {
            EmissionPolicy::Immediate => {
                let count = block.cumulative_count(self.tid);
                state.close_slice(self.tid, block.key().end(), block.module(), count)
            }
            EmissionPolicy::Deferred | EmissionPolicy::External => {
                state.controller.mark_pending();
                Ok(())
            }
        }
    }

    /// Entry and exit of a region with no other event in between
    ///
    /// # Errors
    /// Returns an error if a vector cannot be written
    pub fn execute_block(&mut self, block: &Arc<Block>) -> Result<(), ProfilerError> {
        self.block_entry(block)?;
        self.block_exit(block)
    }

    /// One iteration of a rep-prefixed instruction
    pub fn count_rep_iteration(&mut self, first: bool) {
        if let Some(state) = self.state.as_mut() {
            state.controller.count_rep_iteration(first);
        }
    }

    /// A data access; `agen` accesses (emulated scatter/gather address
    /// generation) are not program data and are ignored
    ///
    /// # Errors
    /// Returns [`ProfilerError::MemoryAccessWithoutLocality`] if the locality profile
    /// is not part of this run
    pub fn memory_access(&mut self, addr: Address, agen: bool) -> Result<(), ProfilerError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        if agen {
            return Ok(());
        }
        if state.profiles.iter_mut().any(|profile| profile.access(addr)) {
            Ok(())
        } else {
            Err(ProfilerError::MemoryAccessWithoutLocality(self.tid))
        }
    }

    /// Whether a boundary was crossed and its vector is not emitted yet
    #[must_use]
    pub fn vector_pending(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.controller.is_pending())
    }

    /// Emit a pending vector at a marker chosen by an external component
    ///
    /// The marker count is the thread's execution count of the region that
    /// contains `marker`, plus `offset`. Returns false if nothing was pending.
    ///
    /// # Errors
    /// Returns an error if a vector cannot be written
    pub fn emit_pending_vector(
        &mut self,
        marker: Address,
        module: ModuleId,
        offset: u64,
    ) -> Result<bool, ProfilerError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        if !state.controller.take_pending() {
            return Ok(false);
        }
        let executed = match state.profiler.blocks().find_containing(marker) {
            Some(block) => block.cumulative_count(self.tid),
            None => {
                log::debug!("{}: marker {} is not in any known region", self.tid, marker);
                0
            }
        };
        state.close_slice(self.tid, marker, module, executed + offset)?;
        Ok(true)
    }

    /// Stop profiling the thread
    ///
    /// A pending vector is emitted at the end of the last region. With
    /// emit-last, the partial trailing slice gets a vector too. Then every
    /// profile writes its trailer and is flushed. Returns `None` for inert or
    /// already finished handles.
    ///
    /// # Errors
    /// Returns an error if a record cannot be written
    pub fn finish(&mut self) -> Result<Option<ThreadSummary>, ProfilerError> {
        let Some(mut state) = self.state.take() else {
            return Ok(None);
        };
        let tid = self.tid;
        let last = state
            .controller
            .last_block()
            .and_then(|index| state.profiler.blocks().get(index));

        if let Some(last) = &last {
            if state.controller.take_pending() {
                let count = last.cumulative_count(tid);
                state.close_slice(tid, last.key().end(), last.module(), count)?;
            }
            if state.profiler.config().emit_last_slice && state.controller.slice_progress() > 0 {
                let count = last.cumulative_count(tid);
                state.close_slice(tid, last.key().end(), last.module(), count)?;
            }
        }

        let profiler = Arc::clone(&state.profiler);
        let end = ThreadEnd {
            tid,
            cumulative: state.controller.cumulative_instructions(),
            slices: state.controller.completed_slices(),
            blocks: profiler.blocks(),
            modules: profiler.modules(),
            slice_starts: profiler.slice_starts(),
        };
        for profile in &mut state.profiles {
            profile.finish(&end)?;
        }
        profiler.slot_finished(tid);

        log::info!("{} finished: {} slices, {} instructions", tid, end.slices, end.cumulative);
        Ok(Some(ThreadSummary {
            tid: tid.0,
            slices: end.slices,
            instructions: end.cumulative,
            rep_iterations: state.controller.rep_iterations(),
            files: state.profiles.iter().map(|profile| profile.path().to_path_buf()).collect(),
        }))
    }
}

impl ActiveThread {
    /// Reset the timer and emit the finished slice to every profile
    fn close_slice(
        &mut self,
        tid: ThreadId,
        marker: Address,
        module: ModuleId,
        marker_count: u64,
    ) -> Result<(), ProfilerError> {
        self.controller.reset();
        self.profiler.slice_starts().insert(marker);

        let end = SliceEnd {
            tid,
            marker,
            module,
            marker_count,
            cumulative: self.controller.cumulative_instructions(),
            rep_iterations: self.controller.rep_iterations(),
            blocks: self.profiler.blocks(),
        };
        for profile in &mut self.profiles {
            profile.emit_slice_end(&end)?;
        }
        log::debug!(
            "{} slice {} ends at {} (count {}), {} instructions",
            tid,
            self.controller.completed_slices(),
            marker,
            marker_count,
            end.cumulative
        );
        Ok(())
    }
}
