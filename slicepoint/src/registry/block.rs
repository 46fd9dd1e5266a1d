//! Code-region identity and per-thread execution counters
//!
//! Every per-thread counter lives in a slot indexed by [`ThreadId`]. A slot is
//! only ever written by its own thread, so the counting path is a single
//! relaxed atomic add with no lock. The atomics exist to make concurrent
//! slots sound, not to synchronize threads with each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::domain::{Address, BlockId, ModuleId, ProfilerError, ThreadId};

/// Static identity of a code region: first address, last instruction
/// address, and size in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    start: Address,
    end: Address,
    size: u64,
}

impl BlockKey {
    /// Create a key
    ///
    /// # Errors
    /// Returns [`ProfilerError::InvalidBlockKey`] if `end < start`
    pub fn new(start: Address, end: Address, size: u64) -> Result<Self, ProfilerError> {
        if end < start {
            return Err(ProfilerError::InvalidBlockKey { start, end });
        }
        Ok(Self { start, end, size })
    }

    #[must_use]
    pub fn start(&self) -> Address {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> Address {
        self.end
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether `addr` lies between the first and last instruction address
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr <= self.end
    }
}

/// A registered code region
#[derive(Debug)]
pub struct Block {
    key: BlockKey,
    static_instructions: u64,
    arena_index: usize,
    id: AtomicU32,
    module: ModuleId,
    /// Executions in the current slice, per thread
    slice_counts: Box<[AtomicU64]>,
    /// Executions in all completed slices, per thread
    prior_counts: Box<[AtomicU64]>,
    /// Previous block id → executions, per thread (transition tracking only)
    transitions: Option<Box<[Mutex<BTreeMap<u32, u64>>]>>,
}

fn zeroed_slots(threads: usize) -> Box<[AtomicU64]> {
    (0..threads).map(|_| AtomicU64::new(0)).collect()
}

impl Block {
    fn new(
        key: BlockKey,
        static_instructions: u64,
        arena_index: usize,
        id: BlockId,
        module: ModuleId,
        threads: usize,
        track_transitions: bool,
    ) -> Self {
        let transitions = track_transitions
            .then(|| (0..threads).map(|_| Mutex::new(BTreeMap::new())).collect());
        Self {
            key,
            static_instructions,
            arena_index,
            id: AtomicU32::new(id.0),
            module,
            slice_counts: zeroed_slots(threads),
            prior_counts: zeroed_slots(threads),
            transitions,
        }
    }

    #[must_use]
    pub fn key(&self) -> &BlockKey {
        &self.key
    }

    /// Number of instructions in the region
    #[must_use]
    pub fn static_instructions(&self) -> u64 {
        self.static_instructions
    }

    #[must_use]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Stable position in the registry arena
    #[must_use]
    pub fn arena_index(&self) -> usize {
        self.arena_index
    }

    /// Id written into vectors; [`BlockId::UNASSIGNED`] until the first
    /// execution when ids are assigned lazily
    #[must_use]
    pub fn id(&self) -> BlockId {
        BlockId(self.id.load(Ordering::Acquire))
    }

    /// Count one execution for `tid` in the current slice
    ///
    /// # Panics
    /// Panics if `tid` is beyond the registry's thread capacity. Thread ids
    /// are capacity-checked at thread start, so this indicates a defect.
    pub fn execute(&self, tid: ThreadId) {
        self.slice_counts[tid.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Count one execution and the transition from `previous`
    ///
    /// Without transition tracking this is [`Block::execute`].
    ///
    /// # Panics
    /// Panics if `tid` is beyond the registry's thread capacity.
    pub fn execute_after(&self, tid: ThreadId, previous: Option<&Block>) {
        self.execute(tid);
        let (Some(transitions), Some(previous)) = (&self.transitions, previous) else {
            return;
        };
        let mut edges = transitions[tid.index()].lock().unwrap_or_else(PoisonError::into_inner);
        *edges.entry(previous.id().0).or_insert(0) += 1;
    }

    /// Executions by `tid` in the current slice
    #[must_use]
    pub fn slice_count(&self, tid: ThreadId) -> u64 {
        self.slice_counts[tid.index()].load(Ordering::Relaxed)
    }

    /// Executions by `tid` in completed slices
    #[must_use]
    pub fn prior_count(&self, tid: ThreadId) -> u64 {
        self.prior_counts[tid.index()].load(Ordering::Relaxed)
    }

    /// Executions by `tid` since the thread started
    #[must_use]
    pub fn cumulative_count(&self, tid: ThreadId) -> u64 {
        self.prior_count(tid) + self.slice_count(tid)
    }

    /// Close the slice for `tid`: fold the slice count into the prior count
    /// and return it
    pub fn take_slice_count(&self, tid: ThreadId) -> u64 {
        let count = self.slice_counts[tid.index()].swap(0, Ordering::Relaxed);
        if count > 0 {
            self.prior_counts[tid.index()].fetch_add(count, Ordering::Relaxed);
        }
        count
    }

    /// Take the transition counts recorded by `tid` in the current slice
    #[must_use]
    pub fn take_transitions(&self, tid: ThreadId) -> Vec<(u32, u64)> {
        let Some(transitions) = &self.transitions else {
            return Vec::new();
        };
        let mut edges = transitions[tid.index()].lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *edges).into_iter().collect()
    }

    fn assign_id(&self, id: BlockId) {
        self.id.store(id.0, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Arena {
    by_key: HashMap<BlockKey, usize>,
    blocks: Vec<Arc<Block>>,
}

/// Owner of every [`Block`], addressed by key or by arena index
///
/// Lookups happen at instrumentation time and take the arena lock; counting
/// goes through the returned `Arc<Block>` and never touches the lock.
///
/// # Id assignment
///
/// Without transition tracking ids are assigned when a key is first looked
/// up, in lookup order starting at 1. With transition tracking ids are
/// assigned when a block first executes (on any thread), in execution order
/// starting at 1, so transition records name blocks in the order the
/// program reached them.
#[derive(Debug)]
pub struct BlockRegistry {
    thread_capacity: usize,
    track_transitions: bool,
    arena: RwLock<Arena>,
    next_id: Mutex<u32>,
}

impl BlockRegistry {
    #[must_use]
    pub fn new(thread_capacity: usize, track_transitions: bool) -> Self {
        Self {
            thread_capacity,
            track_transitions,
            arena: RwLock::new(Arena::default()),
            next_id: Mutex::new(1),
        }
    }

    #[must_use]
    pub fn thread_capacity(&self) -> usize {
        self.thread_capacity
    }

    #[must_use]
    pub fn tracks_transitions(&self) -> bool {
        self.track_transitions
    }

    /// Return the block for `key`, creating it with zeroed counters if new
    pub fn lookup_or_create(
        &self,
        key: BlockKey,
        static_instructions: u64,
        module: ModuleId,
    ) -> Arc<Block> {
        if let Some(block) = self.lookup(&key) {
            return block;
        }

        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&index) = arena.by_key.get(&key) {
            return Arc::clone(&arena.blocks[index]);
        }

        let id = if self.track_transitions { BlockId::UNASSIGNED } else { self.allocate_id() };
        let index = arena.blocks.len();
        let block = Arc::new(Block::new(
            key,
            static_instructions,
            index,
            id,
            module,
            self.thread_capacity,
            self.track_transitions,
        ));
        arena.by_key.insert(key, index);
        arena.blocks.push(Arc::clone(&block));
        log::debug!("New block {} [{}..={}] {} ({})", index, key.start, key.end, id, module);
        block
    }

    /// Existing block for `key`
    #[must_use]
    pub fn lookup(&self, key: &BlockKey) -> Option<Arc<Block>> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        arena.by_key.get(key).map(|&index| Arc::clone(&arena.blocks[index]))
    }

    /// Block at a stable arena index
    #[must_use]
    pub fn get(&self, arena_index: usize) -> Option<Arc<Block>> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        arena.blocks.get(arena_index).cloned()
    }

    /// First registered block whose range contains `addr`
    #[must_use]
    pub fn find_containing(&self, addr: Address) -> Option<Arc<Block>> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        arena.blocks.iter().find(|block| block.key.contains(addr)).cloned()
    }

    /// Snapshot of all blocks in arena order
    #[must_use]
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner).blocks.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.read().unwrap_or_else(PoisonError::into_inner).blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count one execution of `block` by `tid`, after `previous`
    ///
    /// Assigns the block id first when ids are assigned on execution.
    pub fn record_execution(&self, tid: ThreadId, block: &Block, previous: Option<&Block>) {
        if self.track_transitions {
            self.ensure_id(block);
            block.execute_after(tid, previous);
        } else {
            block.execute(tid);
        }
    }

    fn ensure_id(&self, block: &Block) {
        if block.id().is_assigned() {
            return;
        }
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race while we waited
        if !block.id().is_assigned() {
            block.assign_id(BlockId(*next));
            *next += 1;
        }
    }

    fn allocate_id(&self) -> BlockId {
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = BlockId(*next);
        *next += 1;
        id
    }
}
