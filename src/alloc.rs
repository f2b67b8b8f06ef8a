//! Node allocation.
//!
//! Nodes are reclaimed as boxes (either directly when the tree drops, or
//! through [`Guard::defer_destroy`](crossbeam_epoch::Guard::defer_destroy)
//! once they are retired), so every allocator hands out memory from the
//! global allocator. What an allocator controls is *whether* a node may be
//! allocated, which lets callers bound a tree or inject failures.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, TreeError};

/// Source of node memory.
///
/// # Safety
///
/// A successful `allocate` must return memory obtained from the global
/// allocator with exactly `layout`, because nodes are released with
/// `Box::from_raw`.
pub unsafe trait NodeAllocator: Send + Sync {
    /// Allocates memory for one node, or reports
    /// [`TreeError::AllocationFailure`].
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>>;
}

/// The global allocator. Fails only when the system is out of memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

unsafe impl NodeAllocator for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        // SAFETY: node layouts are never zero-sized.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(TreeError::AllocationFailure {
            bytes: layout.size(),
        })
    }
}

/// Allocator with a fixed budget of nodes.
///
/// Every successful allocation consumes one unit of budget; once the budget
/// is exhausted allocations fail until [`Limited::refill`] is called.
/// Retiring nodes does not give budget back.
#[derive(Debug)]
pub struct Limited<A = Global> {
    inner: A,
    remaining: AtomicUsize,
}

impl Limited<Global> {
    pub fn new(budget: usize) -> Self {
        Self::with_allocator(Global, budget)
    }
}

impl<A: NodeAllocator> Limited<A> {
    pub fn with_allocator(inner: A, budget: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(budget),
        }
    }

    /// Remaining number of nodes that may be allocated.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Resets the budget to `budget` nodes.
    pub fn refill(&self, budget: usize) {
        self.remaining.store(budget, Ordering::Relaxed);
    }
}

unsafe impl<A: NodeAllocator> NodeAllocator for Limited<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .map_err(|_| TreeError::AllocationFailure {
                bytes: layout.size(),
            })?;
        self.inner.allocate(layout)
    }
}
