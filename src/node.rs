use std::alloc::Layout;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

use crate::alloc::NodeAllocator;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

impl Side {
    #[inline]
    pub(crate) fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// A tree node.
///
/// `key`, `value`, `left` and `right` are what readers look at. `size` is
/// writer-only bookkeeping: it may change under a concurrent reader, which
/// never loads it, so relaxed accesses suffice.
#[derive(Debug)]
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    size: AtomicUsize,
    left: Atomic<Node<K, V>>,
    right: Atomic<Node<K, V>>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(
        key: K,
        value: V,
        left: Shared<'_, Node<K, V>>,
        right: Shared<'_, Node<K, V>>,
    ) -> Self {
        Self {
            size: AtomicUsize::new(1 + node_size(left) + node_size(right)),
            key,
            value,
            left: Atomic::from(left),
            right: Atomic::from(right),
        }
    }

    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Moves `self` into memory obtained from `alloc`.
    pub(crate) fn alloc<A: NodeAllocator>(self, alloc: &A) -> Result<Owned<Self>> {
        let ptr = alloc.allocate(Self::layout())?.cast::<Self>();
        // SAFETY: `ptr` is fresh global-allocator memory with the layout of
        // `Self`, which is what `Owned::from_raw` expects.
        unsafe {
            ptr.as_ptr().write(self);
            Ok(Owned::from_raw(ptr.as_ptr()))
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn link(&self, side: Side) -> &Atomic<Node<K, V>> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    #[inline]
    pub(crate) fn load<'g>(&self, side: Side, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        self.link(side).load(Ordering::Acquire, guard)
    }
}

#[inline]
pub(crate) fn node_size<K, V>(node: Shared<'_, Node<K, V>>) -> usize {
    // SAFETY: callers only pass null or nodes protected by their guard.
    unsafe { node.as_ref() }.map_or(0, Node::size)
}
