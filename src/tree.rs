use std::cmp;
use std::fmt;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{unprotected, Atomic, Guard, Shared};
use parking_lot::Mutex;
use scopeguard::ScopeGuard;

use crate::alloc::{Global, NodeAllocator};
use crate::config::TreeConfig;
use crate::error::Result;
use crate::node::{node_size, Node, Side};
use crate::reclaim::Reclaimer;
use crate::state::State;
use crate::stats::{Stats, StatsSnapshot};

/// A weight-balanced binary search tree with one writer at a time and any
/// number of lock-free readers.
///
/// Writers serialize on an internal lock and publish each mutation with a
/// single root swap (plus at most one child-pointer write per reused node),
/// so a reader never observes a partially applied operation. Readers only
/// need a [`Guard`] pinned in the tree's [`Reclaimer`]; references they
/// obtain stay valid until that guard is dropped.
pub struct CbTree<K, V, A = Global> {
    root: Atomic<Node<K, V>>,
    writer: Mutex<()>,
    config: TreeConfig,
    reclaimer: Reclaimer,
    alloc: A,
    stats: Stats,
}

impl<K, V> CbTree<K, V, Global> {
    /// An empty tree with in-place updates and its own reclaimer.
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self::with_parts(config, Reclaimer::new(), Global)
    }
}

impl<K, V> Default for CbTree<K, V, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, A> CbTree<K, V, A> {
    pub fn with_parts(config: TreeConfig, reclaimer: Reclaimer, alloc: A) -> Self {
        Self {
            root: Atomic::null(),
            writer: Mutex::new(()),
            config,
            reclaimer,
            alloc,
            stats: Stats::default(),
        }
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Pins the calling thread in this tree's reclaimer.
    pub fn pin(&self) -> Guard {
        self.reclaimer.pin()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// # Panics
    ///
    /// Panics if `guard` was not pinned in this tree's reclaimer.
    #[inline]
    pub(crate) fn check_guard(&self, guard: &Guard) {
        assert!(
            self.reclaimer.owns(guard),
            "guard is not pinned in this tree's reclaimer"
        );
    }

    #[inline]
    pub(crate) fn load_root<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        self.root.load(Ordering::Acquire, guard)
    }

    pub fn is_empty(&self, guard: &Guard) -> bool {
        self.check_guard(guard);
        self.load_root(guard).is_null()
    }

    /// Number of entries. Only exact when no writer runs concurrently.
    pub fn len(&self, guard: &Guard) -> usize {
        self.check_guard(guard);
        node_size(self.load_root(guard))
    }

    /// In-order iterator over the tree as of its creation.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V> {
        self.check_guard(guard);
        let mut iter = Iter {
            stack: Vec::new(),
            guard,
        };
        iter.push_left(self.load_root(guard));
        iter
    }

    /// Calls `f` on every entry in ascending key order.
    pub fn for_each<'g, F>(&'g self, guard: &'g Guard, mut f: F)
    where
        F: FnMut(&'g K, &'g V),
    {
        for (key, value) in self.iter(guard) {
            f(key, value);
        }
    }
}

impl<K: Ord, V, A> CbTree<K, V, A> {
    pub fn get<'g>(&'g self, key: &K, guard: &'g Guard) -> Option<&'g V> {
        self.check_guard(guard);
        let mut node = self.load_root(guard);
        while let Some(node_ref) = unsafe { node.as_ref() } {
            match key.cmp(&node_ref.key) {
                cmp::Ordering::Equal => return Some(&node_ref.value),
                cmp::Ordering::Less => node = node_ref.load(Side::Left, guard),
                cmp::Ordering::Greater => node = node_ref.load(Side::Right, guard),
            }
        }
        None
    }

    pub fn contains_key(&self, key: &K, guard: &Guard) -> bool {
        self.get(key, guard).is_some()
    }

    /// Entry with the smallest key strictly greater than `key`.
    pub fn find_greater_than<'g>(&'g self, key: &K, guard: &'g Guard) -> Option<(&'g K, &'g V)> {
        self.check_guard(guard);
        let mut best = None;
        let mut node = self.load_root(guard);
        while let Some(node_ref) = unsafe { node.as_ref() } {
            if *key < node_ref.key {
                best = Some((&node_ref.key, &node_ref.value));
                node = node_ref.load(Side::Left, guard);
            } else {
                node = node_ref.load(Side::Right, guard);
            }
        }
        best
    }

    /// Entry with the largest key less than or equal to `key`.
    pub fn find_less_or_equal<'g>(&'g self, key: &K, guard: &'g Guard) -> Option<(&'g K, &'g V)> {
        self.check_guard(guard);
        let mut best = None;
        let mut node = self.load_root(guard);
        while let Some(node_ref) = unsafe { node.as_ref() } {
            match key.cmp(&node_ref.key) {
                cmp::Ordering::Equal => return Some((&node_ref.key, &node_ref.value)),
                cmp::Ordering::Greater => {
                    best = Some((&node_ref.key, &node_ref.value));
                    node = node_ref.load(Side::Right, guard);
                }
                cmp::Ordering::Less => node = node_ref.load(Side::Left, guard),
            }
        }
        best
    }
}

impl<K, V, A> CbTree<K, V, A>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
    A: NodeAllocator,
{
    /// Inserts `key` unless it is already present.
    ///
    /// Returns whether the entry was added. An existing entry keeps its
    /// value. On error the tree is left unchanged.
    pub fn insert(&self, key: K, value: V, guard: &Guard) -> Result<bool> {
        self.check_guard(guard);
        let _writer = self.writer.lock();

        let mut state = scopeguard::guard(
            State::new(&self.alloc, self.config.in_place, guard),
            |state| state.abort(&self.stats),
        );
        let old_root = self.load_root(guard);
        let (new_root, inserted) = state.do_insert(old_root, &key, &value)?;
        ScopeGuard::into_inner(state).commit(&self.root, new_root, &self.stats);
        Ok(inserted)
    }

    /// Removes `key` and returns its value, which stays readable for as long
    /// as `guard` lives. On error the tree is left unchanged.
    pub fn remove<'g>(&'g self, key: &K, guard: &'g Guard) -> Result<Option<&'g V>> {
        self.check_guard(guard);
        let _writer = self.writer.lock();

        let mut state = scopeguard::guard(
            State::new(&self.alloc, self.config.in_place, guard),
            |state| state.abort(&self.stats),
        );
        let old_root = self.load_root(guard);
        let (new_root, value) = state.do_remove(old_root, key)?;
        ScopeGuard::into_inner(state).commit(&self.root, new_root, &self.stats);
        Ok(value)
    }
}

impl<K, V, A> Drop for CbTree<K, V, A> {
    fn drop(&mut self) {
        unsafe {
            let mut stack = vec![self.root.load(Ordering::Relaxed, unprotected())];

            while let Some(node) = stack.pop() {
                if node.is_null() {
                    continue;
                }

                let node_ref = node.deref();

                stack.push(node_ref.load(Side::Left, unprotected()));
                stack.push(node_ref.load(Side::Right, unprotected()));
                drop(node.into_owned());
            }
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, A> fmt::Debug for CbTree<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.pin();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

/// In-order iterator returned by [`CbTree::iter`].
pub struct Iter<'g, K, V> {
    stack: Vec<&'g Node<K, V>>,
    guard: &'g Guard,
}

impl<'g, K, V> Iter<'g, K, V> {
    fn push_left(&mut self, mut node: Shared<'g, Node<K, V>>) {
        while let Some(node_ref) = unsafe { node.as_ref() } {
            self.stack.push(node_ref);
            node = node_ref.load(Side::Left, self.guard);
        }
    }
}

impl<'g, K, V> Iterator for Iter<'g, K, V> {
    type Item = (&'g K, &'g V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.load(Side::Right, self.guard));
        Some((&node.key, &node.value))
    }
}
