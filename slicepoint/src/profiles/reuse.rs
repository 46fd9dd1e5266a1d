//! Reuse-distance tracking for locality vectors
//!
//! The reuse (stack) distance of an access is the number of distinct lines
//! touched since the previous access to the same line. It is computed with a
//! Fenwick tree over logical access times: each live line holds a single mark
//! at the time of its latest access, so the marks after a line's previous
//! access are exactly the distinct lines touched since.
//!
//! # Performance
//!
//! - `access()`: O(log n) amortized, n = distinct lines seen
//! - Memory: O(n); the time axis is compacted when it fills up

use std::collections::HashMap;

use slicepoint_common::LOCALITY_BUCKETS;

const MIN_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Fenwick {
    tree: Vec<i64>,
}

impl Fenwick {
    fn new(len: usize) -> Self {
        Self { tree: vec![0; len + 1] }
    }

    /// Tree with a mark at every position below `marked`
    fn with_prefix_marked(len: usize, marked: usize) -> Self {
        let mut tree = vec![0; len + 1];
        for i in 1..=len {
            if i <= marked {
                tree[i] += 1;
            }
            let parent = i + (i & i.wrapping_neg());
            if parent <= len {
                tree[parent] += tree[i];
            }
        }
        Self { tree }
    }

    fn len(&self) -> usize {
        self.tree.len() - 1
    }

    fn add(&mut self, pos: usize, delta: i64) {
        let mut i = pos + 1;
        while i < self.tree.len() {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Sum over positions `0..=pos`
    fn prefix(&self, pos: usize) -> i64 {
        let mut i = pos + 1;
        let mut sum = 0;
        while i > 0 {
            sum += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        sum
    }
}

/// LRU stack-distance oracle over cache-line addresses
#[derive(Debug, Clone)]
pub struct ReuseStack {
    last_access: HashMap<u64, usize>,
    marks: Fenwick,
    clock: usize,
}

impl Default for ReuseStack {
    fn default() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }
}

impl ReuseStack {
    /// Stack whose time axis starts with room for `capacity` accesses
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { last_access: HashMap::new(), marks: Fenwick::new(capacity.max(1)), clock: 0 }
    }

    /// Record an access; returns the reuse distance, or `None` on first touch
    pub fn access(&mut self, line: u64) -> Option<u64> {
        if self.clock == self.marks.len() {
            self.compact();
        }

        let distance = self.last_access.get(&line).copied().map(|previous| {
            let live = i64::try_from(self.last_access.len()).unwrap_or(i64::MAX);
            let newer = live - self.marks.prefix(previous);
            self.marks.add(previous, -1);
            u64::try_from(newer).unwrap_or(0)
        });

        self.marks.add(self.clock, 1);
        self.last_access.insert(line, self.clock);
        self.clock += 1;
        distance
    }

    /// Distinct lines seen so far
    #[must_use]
    pub fn distinct_lines(&self) -> usize {
        self.last_access.len()
    }

    /// Renumber live access times to `0..n` and grow the axis if more than
    /// half of it would stay occupied
    fn compact(&mut self) {
        let mut live: Vec<(usize, u64)> =
            self.last_access.iter().map(|(&line, &time)| (time, line)).collect();
        live.sort_unstable();

        let mut capacity = self.marks.len();
        while live.len() * 2 > capacity {
            capacity *= 2;
        }

        for (time, (_, line)) in live.iter().enumerate() {
            self.last_access.insert(*line, time);
        }
        self.marks = Fenwick::with_prefix_marked(capacity, live.len());
        self.clock = live.len();
        log::trace!("Compacted reuse stack: {} live lines, capacity {}", live.len(), capacity);
    }
}

/// Histogram bucket for a reuse distance
///
/// Bucket 0 is a first touch; distance `d` lands in `1 + floor(log2(d + 1))`,
/// capped at the last bucket.
#[must_use]
pub fn bucket_for(distance: Option<u64>) -> usize {
    match distance {
        None => 0,
        Some(d) => {
            let log2 = 63 - d.saturating_add(1).leading_zeros() as usize;
            (1 + log2).min(LOCALITY_BUCKETS - 1)
        }
    }
}

/// Reuse stack plus the per-slice histogram it feeds
///
/// The stack persists for the whole thread; only the histogram is sliced.
#[derive(Debug, Clone)]
pub struct ReuseHistogram {
    stack: ReuseStack,
    counts: [u64; LOCALITY_BUCKETS],
}

impl Default for ReuseHistogram {
    fn default() -> Self {
        Self { stack: ReuseStack::default(), counts: [0; LOCALITY_BUCKETS] }
    }
}

impl ReuseHistogram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(&mut self, line: u64) {
        let bucket = bucket_for(self.stack.access(line));
        self.counts[bucket] += 1;
    }

    #[must_use]
    pub fn counts(&self) -> &[u64; LOCALITY_BUCKETS] {
        &self.counts
    }

    /// Return the histogram for the slice and start a new one
    pub fn take_counts(&mut self) -> [u64; LOCALITY_BUCKETS] {
        std::mem::replace(&mut self.counts, [0; LOCALITY_BUCKETS])
    }
}
