//! # Profile multiplexer
//!
//! [`Profiler`] holds everything shared between profiled threads: the
//! configuration, the block and module registries, the slice-start set and a
//! capacity-checked slot per thread id. Per-thread state lives in the
//! [`ThreadProfiler`] handed out by [`Profiler::thread_start`].
//!
//! ## Lifecycle
//!
//! ```text
//! activate ──▶ thread_start(tid) ──▶ block_entry / block_exit / memory_access ...
//!                                 └─▶ finish ──▶ ThreadSummary
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::collaborators::{Instrumentation, ThreadOracle};
use super::thread::ThreadProfiler;
use crate::config::{ProfilerConfig, SliceLengths};
use crate::domain::{Address, ModuleId, Pid, ProfilerError, ThreadId};
use crate::profiles::{ProfileKind, ProfileSet, StartOptions, ThreadProfile};
use crate::registry::{Block, BlockKey, BlockRegistry, ModuleInfo, ModuleRegistry, SliceStarts};
use crate::slicing::{EmissionPolicy, SliceController};

/// Cross-thread view of one thread id
///
/// `started` is set once and never cleared: counter slots and vector files
/// belong to a single incarnation of the thread id.
#[derive(Debug, Default)]
struct ThreadSlot {
    started: AtomicBool,
    active: AtomicBool,
    has_first_ip: AtomicBool,
}

/// Shared engine state
pub struct Profiler {
    config: ProfilerConfig,
    profiles: ProfileSet,
    policy: EmissionPolicy,
    lengths: Option<SliceLengths>,
    pid: Option<Pid>,
    blocks: BlockRegistry,
    modules: ModuleRegistry,
    slice_starts: SliceStarts,
    threads: Box<[ThreadSlot]>,
    instrumentation: Arc<dyn Instrumentation>,
    oracle: Arc<dyn ThreadOracle>,
}

impl Profiler {
    /// Build the engine for `config`
    ///
    /// Returns `Ok(None)` when no profile is enabled: the engine is inert and
    /// installs nothing.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the slice length
    /// file cannot be read
    pub fn activate(
        config: ProfilerConfig,
        instrumentation: Arc<dyn Instrumentation>,
        oracle: Arc<dyn ThreadOracle>,
    ) -> Result<Option<Arc<Self>>, ProfilerError> {
        let profiles = config.profiles();
        if profiles.is_empty() {
            log::info!("No profile enabled, profiler inactive");
            return Ok(None);
        }
        config.validate()?;

        let lengths = config.slice_lengths()?;
        if let Some(lengths) = &lengths {
            log::info!(
                "Loaded {} slice lengths",
                usize::from(lengths.initial.is_some()) + lengths.queue.len()
            );
        }

        let track_transitions =
            config.emit_prev_block_counts && profiles.contains(ProfileKind::Frequency);
        let threads = (0..config.max_threads).map(|_| ThreadSlot::default()).collect();
        let profiler = Self {
            profiles,
            policy: config.emission_policy(),
            lengths,
            pid: config.pid_in_filenames.then(Pid::current),
            blocks: BlockRegistry::new(config.max_threads, track_transitions),
            modules: ModuleRegistry::new(),
            slice_starts: SliceStarts::new(),
            threads,
            instrumentation,
            oracle,
            config,
        };

        log::info!(
            "Profiler active: {:?}, slice size {}, {:?} emission, {} thread slots",
            profiler.profiles.iter().map(ProfileKind::tag).collect::<Vec<_>>(),
            profiler.config.slice_size,
            profiler.policy,
            profiler.threads.len()
        );
        Ok(Some(Arc::new(profiler)))
    }

    #[must_use]
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    #[must_use]
    pub fn profiles(&self) -> ProfileSet {
        self.profiles
    }

    #[must_use]
    pub fn policy(&self) -> EmissionPolicy {
        self.policy
    }

    #[must_use]
    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    #[must_use]
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    #[must_use]
    pub fn slice_starts(&self) -> &SliceStarts {
        &self.slice_starts
    }

    /// Whether memory accesses need to be instrumented at all
    #[must_use]
    pub fn counting_memory(&self) -> bool {
        self.profiles.contains(ProfileKind::Locality)
    }

    /// Whether first-IP capture probes are still needed: some active thread
    /// has not reported its first instruction yet
    #[must_use]
    pub fn wants_first_ip_probes(&self) -> bool {
        self.config.emit_first_slice
            && self.threads.iter().any(|slot| {
                slot.active.load(Ordering::Acquire) && !slot.has_first_ip.load(Ordering::Acquire)
            })
    }

    /// Register a code region as seen by a probe
    ///
    /// # Errors
    /// Returns [`ProfilerError::InvalidBlockKey`] if `end < start`
    pub fn register_block(
        &self,
        start: Address,
        end: Address,
        size: u64,
        static_instructions: u64,
        module: ModuleId,
    ) -> Result<Arc<Block>, ProfilerError> {
        let key = BlockKey::new(start, end, size)?;
        Ok(self.blocks.lookup_or_create(key, static_instructions, module))
    }

    pub fn module_loaded(&self, id: ModuleId, name: impl Into<String>, base: Address) {
        self.modules.add(ModuleInfo { id, name: name.into(), base });
    }

    pub fn module_unloaded(&self, id: ModuleId) {
        if let Some(module) = self.modules.remove(id) {
            log::debug!("Module unloaded: {} {}", module.id, module.name);
        }
    }

    /// Start profiling thread `tid`
    ///
    /// Uninteresting threads get an inert handle whose callbacks do nothing.
    /// For interesting threads the vector files are opened and the thread is
    /// marked active.
    ///
    /// # Errors
    /// Returns [`ProfilerError::ThreadCapacityExceeded`] if `tid` is beyond
    /// `max-threads`, [`ProfilerError::ThreadAlreadyStarted`] if `tid` was
    /// started before (even if it has finished since), or an error if a
    /// vector file cannot be opened
    pub fn thread_start(self: &Arc<Self>, tid: ThreadId) -> Result<ThreadProfiler, ProfilerError> {
        if !self.oracle.is_interesting(tid) {
            log::info!("{tid} is not interesting, not profiling it");
            return Ok(ThreadProfiler::inert(tid));
        }
        let slot = self.slot(tid)?;
        if slot.started.swap(true, Ordering::AcqRel) {
            return Err(ProfilerError::ThreadAlreadyStarted(tid));
        }

        let options = StartOptions {
            prefix: &self.config.output_prefix,
            pid: self.pid,
            legacy: self.config.legacy_format,
            no_symbolic: self.config.no_symbolic,
            track_transitions: self.blocks.tracks_transitions(),
        };
        let profiles = self
            .profiles
            .iter()
            .map(|kind| ThreadProfile::start(kind, tid, &options))
            .collect::<Result<Vec<_>, _>>()?;

        let controller = SliceController::new(
            self.config.fixed_slice_size(),
            self.lengths.clone(),
            self.config.emit_first_slice,
        );

        slot.has_first_ip.store(false, Ordering::Release);
        slot.active.store(true, Ordering::Release);
        if self.config.emit_first_slice {
            // Capture probes are inserted for this thread on re-instrumentation
            self.instrumentation.remove_instrumentation();
        }

        log::info!("Profiling {tid}");
        Ok(ThreadProfiler::active(tid, Arc::clone(self), controller, profiles))
    }

    pub(super) fn slot_recorded_first_ip(&self, tid: ThreadId) {
        if let Some(slot) = self.threads.get(tid.index()) {
            slot.has_first_ip.store(true, Ordering::Release);
        }
        if !self.wants_first_ip_probes() {
            log::info!("Every active thread reported its first IP, removing capture probes");
            self.instrumentation.remove_instrumentation();
        }
    }

    pub(super) fn slot_finished(&self, tid: ThreadId) {
        if let Some(slot) = self.threads.get(tid.index()) {
            slot.active.store(false, Ordering::Release);
        }
    }

    fn slot(&self, tid: ThreadId) -> Result<&ThreadSlot, ProfilerError> {
        self.threads.get(tid.index()).ok_or(ProfilerError::ThreadCapacityExceeded {
            tid,
            capacity: self.threads.len(),
        })
    }
}
