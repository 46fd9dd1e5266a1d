//! Per-thread slice countdown
//!
//! The controller is pure bookkeeping: it never writes output. The thread
//! profiler drives it from the probe callbacks and turns the boundaries it
//! reports into emissions.
//!
//! ```text
//!   AwaitingFirstMarker ──first IP──▶ Active ──timer < 0──▶ Boundary
//!                                       ▲                      │
//!                                       └──────── reset ───────┘
//! ```

use std::collections::VecDeque;

use crate::config::SliceLengths;
use crate::domain::{Address, ModuleId};

/// How a detected boundary becomes an emitted vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionPolicy {
    /// Emit at the boundary block, marker = its end address
    Immediate,
    /// Emit at the entry of the next block, marker = its start address
    Deferred,
    /// Only flag the boundary; an external component triggers emission
    External,
}

/// Observable state of a thread's slicing state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlicePhase {
    /// First-slice emission is on and the first IP is not known yet
    AwaitingFirstMarker,
    /// Counting down
    Active,
    /// The timer went negative and the slice is not emitted yet
    Boundary,
}

/// Where a thread started executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstMarker {
    pub address: Address,
    pub module: ModuleId,
}

/// Countdown state for one thread
#[derive(Debug, Clone)]
pub struct SliceController {
    fixed_size: i64,
    /// Instructions left in the slice; negative once the boundary is crossed
    timer: i64,
    current_size: i64,
    cumulative: i64,
    lengths: VecDeque<u64>,
    wants_first_marker: bool,
    first_marker: Option<FirstMarker>,
    last_block: Option<usize>,
    pending: bool,
    rep_iterations: u64,
    completed_slices: u64,
}

/// Lengths past `i64::MAX` are rejected at load time; saturate rather than wrap
fn as_signed(length: u64) -> i64 {
    i64::try_from(length).unwrap_or(i64::MAX)
}

impl SliceController {
    /// Create a controller
    ///
    /// The first slice uses `lengths.initial` when present, otherwise the
    /// fixed size. Queued lengths are consumed in order at each reset.
    #[must_use]
    pub fn new(fixed_size: i64, lengths: Option<SliceLengths>, wants_first_marker: bool) -> Self {
        let SliceLengths { initial, queue } = lengths.unwrap_or_default();
        let first_size = initial.map_or(fixed_size, as_signed);
        Self {
            fixed_size,
            timer: first_size,
            current_size: first_size,
            cumulative: 0,
            lengths: queue,
            wants_first_marker,
            first_marker: None,
            last_block: None,
            pending: false,
            rep_iterations: 0,
            completed_slices: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> SlicePhase {
        if self.timer < 0 {
            SlicePhase::Boundary
        } else if self.wants_first_marker && self.first_marker.is_none() {
            SlicePhase::AwaitingFirstMarker
        } else {
            SlicePhase::Active
        }
    }

    /// Account one executed block; returns true when this crosses a boundary
    pub fn advance(&mut self, arena_index: usize, static_instructions: u64) -> bool {
        self.timer -= as_signed(static_instructions);
        self.last_block = Some(arena_index);
        self.timer < 0
    }

    /// Close the current slice and load the next slice length
    pub fn reset(&mut self) {
        self.cumulative += self.current_size - self.timer;
        let next = self.lengths.pop_front().map_or(self.fixed_size, as_signed);
        self.timer = next;
        self.current_size = next;
        self.completed_slices += 1;
    }

    pub fn mark_pending(&mut self) {
        self.pending = true;
    }

    /// Clear the pending flag, returning whether it was set
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Record the thread's first IP; only the first call has any effect
    pub fn record_first_marker(&mut self, marker: FirstMarker) -> bool {
        if self.first_marker.is_some() {
            return false;
        }
        self.first_marker = Some(marker);
        true
    }

    #[must_use]
    pub fn first_marker(&self) -> Option<FirstMarker> {
        self.first_marker
    }

    /// Count a rep-prefixed instruction iteration (the first one is already
    /// part of the block count)
    pub fn count_rep_iteration(&mut self, first: bool) {
        if !first {
            self.rep_iterations += 1;
        }
    }

    #[must_use]
    pub fn rep_iterations(&self) -> u64 {
        self.rep_iterations
    }

    #[must_use]
    pub fn timer(&self) -> i64 {
        self.timer
    }

    #[must_use]
    pub fn current_slice_size(&self) -> i64 {
        self.current_size
    }

    /// Instructions in all slices closed so far
    #[must_use]
    pub fn cumulative_instructions(&self) -> u64 {
        u64::try_from(self.cumulative).unwrap_or(0)
    }

    /// Instructions executed in the open slice
    #[must_use]
    pub fn slice_progress(&self) -> i64 {
        self.current_size - self.timer
    }

    /// Arena index of the last executed block
    #[must_use]
    pub fn last_block(&self) -> Option<usize> {
        self.last_block
    }

    #[must_use]
    pub fn completed_slices(&self) -> u64 {
        self.completed_slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run `sizes` cyclically for `steps` blocks and return the cumulative
    /// instruction count at every boundary
    fn boundaries(controller: &mut SliceController, sizes: &[u64], steps: usize) -> Vec<u64> {
        let mut found = Vec::new();
        for step in 0..steps {
            let index = step % sizes.len();
            if controller.advance(index, sizes[index]) {
                controller.reset();
                found.push(controller.cumulative_instructions());
            }
        }
        found
    }

    #[test]
    fn test_first_boundary_after_three_cycles() {
        let mut controller = SliceController::new(100, None, false);
        let sizes = [10, 20, 5];

        for step in 0..8 {
            assert!(!controller.advance(step % 3, sizes[step % 3]), "early boundary at {step}");
        }
        assert!(controller.advance(2, 5));
        assert_eq!(controller.timer(), -5);
        assert_eq!(controller.phase(), SlicePhase::Boundary);

        controller.reset();
        assert_eq!(controller.cumulative_instructions(), 105);
        assert_eq!(controller.timer(), 100);
        assert_eq!(controller.phase(), SlicePhase::Active);
    }

    #[test]
    fn test_oversized_length_saturates_instead_of_wrapping() {
        let lengths = SliceLengths { initial: Some(u64::MAX), queue: VecDeque::new() };
        let mut controller = SliceController::new(100, Some(lengths), false);
        for _ in 0..3 {
            assert!(!controller.advance(0, 3));
        }
        assert_eq!(controller.timer(), i64::MAX - 9);
    }

    #[test]
    fn test_exact_fill_is_not_a_boundary() {
        let mut controller = SliceController::new(10, None, false);
        assert!(!controller.advance(0, 10));
        assert_eq!(controller.timer(), 0);
        assert!(controller.advance(0, 1));
    }

    #[test]
    fn test_boundaries_are_deterministic() {
        let sizes = [7, 13, 1, 29];
        let run = || {
            let lengths = SliceLengths { initial: Some(40), queue: VecDeque::from(vec![25, 60]) };
            let mut controller = SliceController::new(50, Some(lengths), false);
            boundaries(&mut controller, &sizes, 200)
        };
        let first = run();
        assert_eq!(first, run());
        assert_eq!(&first[..3], &[50, 100, 170]);
    }

    #[test]
    fn test_length_queue_then_fixed_size() {
        let lengths = SliceLengths { initial: Some(50), queue: VecDeque::from(vec![30, 20]) };
        let mut controller = SliceController::new(100, Some(lengths), false);

        let mut used = vec![controller.current_slice_size()];
        let mut steps = 0;
        while used.len() < 6 {
            steps += 1;
            if controller.advance(0, 1) {
                controller.reset();
                used.push(controller.current_slice_size());
            }
        }

        assert_eq!(used, vec![50, 30, 20, 100, 100, 100]);
        // Each slice overshoots its length by one unit-size block
        assert_eq!(controller.cumulative_instructions(), 51 + 31 + 21 + 101 + 101);
        assert_eq!(steps, 305);
    }

    #[test]
    fn test_first_marker_first_write_wins() {
        let mut controller = SliceController::new(100, None, true);
        assert_eq!(controller.phase(), SlicePhase::AwaitingFirstMarker);

        let first = FirstMarker { address: Address(0x1000), module: ModuleId(1) };
        assert!(controller.record_first_marker(first));
        assert!(!controller.record_first_marker(FirstMarker {
            address: Address(0x2000),
            module: ModuleId(2)
        }));
        assert_eq!(controller.first_marker(), Some(first));
        assert_eq!(controller.phase(), SlicePhase::Active);
    }

    #[test]
    fn test_pending_flag() {
        let mut controller = SliceController::new(1, None, false);
        controller.mark_pending();
        assert!(controller.is_pending());
        assert!(controller.take_pending());
        assert!(!controller.take_pending());
    }

    #[test]
    fn test_rep_iterations_skip_first() {
        let mut controller = SliceController::new(1, None, false);
        controller.count_rep_iteration(true);
        controller.count_rep_iteration(false);
        controller.count_rep_iteration(false);
        assert_eq!(controller.rep_iterations(), 2);
    }
}
