//! Balance engine and mutators.
//!
//! A mutation runs against a [`State`] that records everything it would
//! change: nodes it allocated, nodes it replaced, and the single child
//! pointer it overwrites on each node it reuses in place. Nothing becomes
//! visible to readers until [`State::commit`], which applies the in-place
//! pointer writes bottom-up and then publishes the new root. If the
//! operation fails half-way, [`State::abort`] throws the record away and the
//! tree is exactly as it was.

use std::cmp;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard, Shared};
use tracing::{debug, trace};

use crate::alloc::NodeAllocator;
use crate::error::Result;
use crate::node::{node_size, Node, Side};
use crate::stats::Stats;

/// Maximum size ratio between the two subtrees of a node.
pub(crate) const WEIGHT: usize = 4;

/// Whether subtrees of `ln` and `rn` nodes may sit under one node without
/// a rotation.
#[inline]
pub(crate) fn is_balanced(ln: usize, rn: usize) -> bool {
    ln + rn < 2 || (rn <= WEIGHT * ln && ln <= WEIGHT * rn)
}

/// Child pointer of a reused node, to be stored at commit time.
struct PendingWrite<'g, K, V> {
    node: Shared<'g, Node<K, V>>,
    side: Side,
    child: Shared<'g, Node<K, V>>,
    old_size: usize,
}

pub(crate) struct State<'g, K, V, A> {
    guard: &'g Guard,
    alloc: &'g A,
    in_place: bool,
    /// Nodes built by this operation. Destroyed on abort.
    new_nodes: Vec<Shared<'g, Node<K, V>>>,
    /// Nodes this operation unlinks. Retired on commit.
    retired_nodes: Vec<Shared<'g, Node<K, V>>>,
    pending: Vec<PendingWrite<'g, K, V>>,
    rotations: u64,
}

impl<'g, K, V, A> State<'g, K, V, A>
where
    K: Ord + Clone,
    V: Clone,
    A: NodeAllocator,
{
    pub(crate) fn new(alloc: &'g A, in_place: bool, guard: &'g Guard) -> Self {
        Self {
            guard,
            alloc,
            in_place,
            new_nodes: Vec::new(),
            retired_nodes: Vec::new(),
            pending: Vec::new(),
            rotations: 0,
        }
    }

    /// Child of `node` as this operation sees it, i.e. including the
    /// pending in-place writes.
    fn child(&self, node: Shared<'g, Node<K, V>>, side: Side) -> Shared<'g, Node<K, V>> {
        if let Some(write) = self
            .pending
            .iter()
            .rev()
            .find(|w| w.node == node && w.side == side)
        {
            return write.child;
        }
        unsafe { node.deref() }.load(side, self.guard)
    }

    fn retire_node(&mut self, node: Shared<'g, Node<K, V>>) {
        self.retired_nodes.push(node);
    }

    fn mk_node(
        &mut self,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<Shared<'g, Node<K, V>>> {
        let node = Node::new(key, value, left, right)
            .alloc(self.alloc)?
            .into_shared(self.guard);
        self.new_nodes.push(node);
        Ok(node)
    }

    /// Replaces `cur` by a balanced node with children `left` and `right`.
    ///
    /// `side` names the child that changed. When `in_place` is set, the tree
    /// allows it and no rotation is needed, `cur` itself is reused: its size
    /// is updated now and the changed pointer is written at commit.
    /// Otherwise `cur` is retired and a new subtree is returned.
    fn mk_balanced(
        &mut self,
        cur: Shared<'g, Node<K, V>>,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        side: Side,
        in_place: bool,
    ) -> Result<Shared<'g, Node<K, V>>> {
        if in_place && self.in_place && is_balanced(node_size(left), node_size(right)) {
            self.update_in_place(cur, left, right, side);
            return Ok(cur);
        }

        let cur_ref = unsafe { cur.deref() };
        let res = self.rebalance(left, right, cur_ref.key.clone(), cur_ref.value.clone())?;
        self.retire_node(cur);
        Ok(res)
    }

    fn update_in_place(
        &mut self,
        cur: Shared<'g, Node<K, V>>,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        side: Side,
    ) {
        let (child, kept) = match side {
            Side::Left => (left, right),
            Side::Right => (right, left),
        };
        // Only one pointer may change per node, or a reader could observe
        // half of the update.
        debug_assert!(self.child(cur, side.other()) == kept);

        let cur_ref = unsafe { cur.deref() };
        let old_size = cur_ref.size();
        cur_ref.set_size(1 + node_size(left) + node_size(right));
        self.pending.push(PendingWrite {
            node: cur,
            side,
            child,
            old_size,
        });
    }

    /// Builds a fresh node holding `key` and `value` over `left` and
    /// `right`, rotating as long as the weight bound is exceeded.
    fn rebalance(
        &mut self,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<Shared<'g, Node<K, V>>> {
        let l_size = node_size(left);
        let r_size = node_size(right);
        if l_size + r_size >= 2 {
            if r_size > WEIGHT * l_size {
                return self.mk_balanced_left(left, right, key, value);
            }
            if l_size > WEIGHT * r_size {
                return self.mk_balanced_right(left, right, key, value);
            }
        }
        self.mk_node(left, right, key, value)
    }

    #[inline]
    fn mk_balanced_left(
        &mut self,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<Shared<'g, Node<K, V>>> {
        let right_left = self.child(right, Side::Left);
        let right_right = self.child(right, Side::Right);

        self.rotations += 1;
        if node_size(right_left) < node_size(right_right) {
            return self.single_left(left, right, right_left, right_right, key, value);
        }
        self.double_left(left, right, right_left, right_right, key, value)
    }

    fn single_left(
        &mut self,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        right_left: Shared<'g, Node<K, V>>,
        right_right: Shared<'g, Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<Shared<'g, Node<K, V>>> {
        trace!("single left rotation");
        let right_ref = unsafe { right.deref() };
        let new_left = self.rebalance(left, right_left, key, value)?;
        let res = self.rebalance(
            new_left,
            right_right,
            right_ref.key.clone(),
            right_ref.value.clone(),
        )?;
        self.retire_node(right);
        Ok(res)
    }

    fn double_left(
        &mut self,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        right_left: Shared<'g, Node<K, V>>,
        right_right: Shared<'g, Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<Shared<'g, Node<K, V>>> {
        trace!("double left rotation");
        let right_ref = unsafe { right.deref() };
        let right_left_ref = unsafe { right_left.deref() };
        let right_left_left = self.child(right_left, Side::Left);
        let right_left_right = self.child(right_left, Side::Right);

        let new_left = self.rebalance(left, right_left_left, key, value)?;
        let new_right = self.rebalance(
            right_left_right,
            right_right,
            right_ref.key.clone(),
            right_ref.value.clone(),
        )?;
        let res = self.rebalance(
            new_left,
            new_right,
            right_left_ref.key.clone(),
            right_left_ref.value.clone(),
        )?;
        self.retire_node(right_left);
        self.retire_node(right);
        Ok(res)
    }

    #[inline]
    fn mk_balanced_right(
        &mut self,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<Shared<'g, Node<K, V>>> {
        let left_right = self.child(left, Side::Right);
        let left_left = self.child(left, Side::Left);

        self.rotations += 1;
        if node_size(left_right) < node_size(left_left) {
            return self.single_right(left, right, left_right, left_left, key, value);
        }
        self.double_right(left, right, left_right, left_left, key, value)
    }

    fn single_right(
        &mut self,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        left_right: Shared<'g, Node<K, V>>,
        left_left: Shared<'g, Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<Shared<'g, Node<K, V>>> {
        trace!("single right rotation");
        let left_ref = unsafe { left.deref() };
        let new_right = self.rebalance(left_right, right, key, value)?;
        let res = self.rebalance(
            left_left,
            new_right,
            left_ref.key.clone(),
            left_ref.value.clone(),
        )?;
        self.retire_node(left);
        Ok(res)
    }

    fn double_right(
        &mut self,
        left: Shared<'g, Node<K, V>>,
        right: Shared<'g, Node<K, V>>,
        left_right: Shared<'g, Node<K, V>>,
        left_left: Shared<'g, Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<Shared<'g, Node<K, V>>> {
        trace!("double right rotation");
        let left_ref = unsafe { left.deref() };
        let left_right_ref = unsafe { left_right.deref() };
        let left_right_left = self.child(left_right, Side::Left);
        let left_right_right = self.child(left_right, Side::Right);

        let new_left = self.rebalance(
            left_left,
            left_right_left,
            left_ref.key.clone(),
            left_ref.value.clone(),
        )?;
        let new_right = self.rebalance(left_right_right, right, key, value)?;
        let res = self.rebalance(
            new_left,
            new_right,
            left_right_ref.key.clone(),
            left_right_ref.value.clone(),
        )?;
        self.retire_node(left_right);
        self.retire_node(left);
        Ok(res)
    }

    /// Inserts `key` below `node`. Returns the new subtree and whether the
    /// key was added; an existing key leaves the subtree untouched.
    pub(crate) fn do_insert(
        &mut self,
        node: Shared<'g, Node<K, V>>,
        key: &K,
        value: &V,
    ) -> Result<(Shared<'g, Node<K, V>>, bool)> {
        if node.is_null() {
            let leaf = self.mk_node(Shared::null(), Shared::null(), key.clone(), value.clone())?;
            return Ok((leaf, true));
        }

        // The subtree is rebuilt bottom-up, so sizes are only touched once
        // the insertion is known to happen.
        let node_ref = unsafe { node.deref() };
        let left = self.child(node, Side::Left);
        let right = self.child(node, Side::Right);
        match key.cmp(&node_ref.key) {
            cmp::Ordering::Less => {
                let (new_left, inserted) = self.do_insert(left, key, value)?;
                if !inserted {
                    return Ok((node, false));
                }
                let res = self.mk_balanced(node, new_left, right, Side::Left, true)?;
                Ok((res, true))
            }
            cmp::Ordering::Greater => {
                let (new_right, inserted) = self.do_insert(right, key, value)?;
                if !inserted {
                    return Ok((node, false));
                }
                let res = self.mk_balanced(node, left, new_right, Side::Right, true)?;
                Ok((res, true))
            }
            cmp::Ordering::Equal => Ok((node, false)),
        }
    }

    /// Unlinks the minimum of the non-empty subtree `node`. Returns the
    /// remaining subtree and the minimum node, which stays linked in the
    /// current tree until the caller publishes its replacement.
    pub(crate) fn delete_min(
        &mut self,
        node: Shared<'g, Node<K, V>>,
    ) -> Result<(Shared<'g, Node<K, V>>, Shared<'g, Node<K, V>>)> {
        let left = self.child(node, Side::Left);
        let right = self.child(node, Side::Right);
        if left.is_null() {
            return Ok((right, node));
        }

        // Never in place: a reader may be between the node being deleted
        // and the minimum, so the minimum must stay reachable until the
        // whole path is swapped in at once.
        let (new_left, min) = self.delete_min(left)?;
        let res = self.mk_balanced(node, new_left, right, Side::Left, false)?;
        Ok((res, min))
    }

    /// Removes `key` below `node`. Returns the new subtree and the removed
    /// value; a missing key leaves the subtree untouched.
    pub(crate) fn do_remove(
        &mut self,
        node: Shared<'g, Node<K, V>>,
        key: &K,
    ) -> Result<(Shared<'g, Node<K, V>>, Option<&'g V>)> {
        if node.is_null() {
            return Ok((node, None));
        }

        let node_ref = unsafe { node.deref() };
        let left = self.child(node, Side::Left);
        let right = self.child(node, Side::Right);
        match key.cmp(&node_ref.key) {
            cmp::Ordering::Less => {
                let (new_left, value) = self.do_remove(left, key)?;
                if value.is_none() {
                    return Ok((node, None));
                }
                let res = self.mk_balanced(node, new_left, right, Side::Left, true)?;
                Ok((res, value))
            }
            cmp::Ordering::Greater => {
                let (new_right, value) = self.do_remove(right, key)?;
                if value.is_none() {
                    return Ok((node, None));
                }
                let res = self.mk_balanced(node, left, new_right, Side::Right, true)?;
                Ok((res, value))
            }
            cmp::Ordering::Equal => {
                let value = Some(&node_ref.value);
                self.retire_node(node);
                if left.is_null() {
                    return Ok((right, value));
                }
                if right.is_null() {
                    return Ok((left, value));
                }

                // The minimum is still linked below us, so its replacement
                // here must be a new node published by our parent together
                // with the new right subtree.
                let (new_right, min) = self.delete_min(right)?;
                let res = self.mk_balanced(min, left, new_right, Side::Right, false)?;
                Ok((res, value))
            }
        }
    }

    /// Publishes the operation: applies the in-place writes bottom-up,
    /// swaps in `new_root` and retires every replaced node.
    pub(crate) fn commit(
        mut self,
        root: &Atomic<Node<K, V>>,
        new_root: Shared<'g, Node<K, V>>,
        stats: &Stats,
    ) {
        debug_assert!(self.retired_unique());

        let in_place = self.pending.len() as u64;
        for write in self.pending.drain(..) {
            let link = unsafe { write.node.deref() }.link(write.side);
            if link.load(Ordering::Relaxed, self.guard) != write.child {
                link.store(write.child, Ordering::Release);
            }
        }
        if root.load(Ordering::Relaxed, self.guard) != new_root {
            root.store(new_root, Ordering::Release);
        }

        let retired = self.retired_nodes.len() as u64;
        for node in self.retired_nodes.drain(..) {
            // SAFETY: `node` is unreachable from the new root, and readers
            // that can still see it are pinned in `guard`'s collector.
            unsafe { self.guard.defer_destroy(node) };
        }

        stats.add_allocated(self.new_nodes.len() as u64);
        stats.add_in_place(in_place);
        stats.add_retired(retired);
        stats.add_rotations(self.rotations);
        self.new_nodes.clear();

        trace!(in_place, retired, rotations = self.rotations, "committed");
    }

    /// Rolls the operation back. Nothing it built was ever published, so
    /// the new nodes are freed immediately.
    pub(crate) fn abort(mut self, stats: &Stats) {
        for write in self.pending.drain(..).rev() {
            unsafe { write.node.deref() }.set_size(write.old_size);
        }
        self.retired_nodes.clear();

        let discarded = self.new_nodes.len();
        for node in self.new_nodes.drain(..) {
            drop(unsafe { node.into_owned() });
        }
        stats.add_aborted();

        debug!(discarded, "aborted tree operation");
    }

    fn retired_unique(&self) -> bool {
        let mut ptrs: Vec<_> = self.retired_nodes.iter().map(|n| n.as_raw()).collect();
        ptrs.sort_unstable();
        ptrs.windows(2).all(|w| w[0] != w[1])
    }
}
