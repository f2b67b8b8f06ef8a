use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Counters maintained by the writer of a tree.
///
/// Only the writer updates them, so relaxed increments are enough; readers
/// of the counters get a monotone but not necessarily simultaneous view.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    allocated: CachePadded<AtomicU64>,
    retired: CachePadded<AtomicU64>,
    in_place: CachePadded<AtomicU64>,
    rotations: CachePadded<AtomicU64>,
    aborted: CachePadded<AtomicU64>,
}

impl Stats {
    #[inline]
    pub(crate) fn add_allocated(&self, n: u64) {
        self.allocated.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_retired(&self, n: u64) {
        self.retired.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_in_place(&self, n: u64) {
        self.in_place.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_rotations(&self, n: u64) {
        self.rotations.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allocated: self.allocated.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            in_place: self.in_place.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

/// Cumulative counters of a tree, see [`CbTree::stats`](crate::CbTree::stats).
///
/// Counts only cover committed operations, except `aborted`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Nodes allocated, including intermediate rotation results.
    pub allocated: u64,
    /// Nodes handed to the reclaimer.
    pub retired: u64,
    /// Nodes updated in place instead of being copied.
    pub in_place: u64,
    /// Single and double rotations.
    pub rotations: u64,
    /// Operations rolled back after an allocation failure.
    pub aborted: u64,
}

impl StatsSnapshot {
    /// Counter-wise difference `self - earlier`.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            allocated: self.allocated - earlier.allocated,
            retired: self.retired - earlier.retired,
            in_place: self.in_place - earlier.in_place,
            rotations: self.rotations - earlier.rotations,
            aborted: self.aborted - earlier.aborted,
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocated: {}, retired: {}, in place: {}, rotations: {}, aborted: {}",
            self.allocated, self.retired, self.in_place, self.rotations, self.aborted
        )
    }
}
