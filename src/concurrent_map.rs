use std::alloc::handle_alloc_error;
use std::collections::BTreeMap;

use crossbeam_epoch::Guard;
use parking_lot::RwLock;

use crate::alloc::Global;
use crate::node::Node;
use crate::reclaim::Reclaimer;
use crate::stats::StatsSnapshot;
use crate::tree::CbTree;

pub trait OutputHolder<V> {
    fn output(&self) -> &V;
}

impl<'g, V> OutputHolder<V> for &'g V {
    fn output(&self) -> &V {
        self
    }
}

impl<V> OutputHolder<V> for V {
    fn output(&self) -> &V {
        self
    }
}

/// Common surface of the maps driven by the benchmark.
pub trait ConcurrentMap<K, V> {
    fn new() -> Self;
    /// Reclaimer the guards passed to this map must be pinned in.
    fn reclaimer(&self) -> &Reclaimer;
    fn get<'g>(&'g self, key: &'g K, guard: &'g Guard) -> Option<impl OutputHolder<V>>;
    fn insert(&self, key: K, value: V, guard: &Guard) -> bool;
    fn remove<'g>(&'g self, key: &'g K, guard: &'g Guard) -> Option<impl OutputHolder<V>>;

    fn pin(&self) -> Guard {
        self.reclaimer().pin()
    }

    /// Structural counters, if the map keeps any.
    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::default()
    }
}

impl<K, V> ConcurrentMap<K, V> for CbTree<K, V, Global>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn new() -> Self {
        CbTree::new()
    }

    fn reclaimer(&self) -> &Reclaimer {
        CbTree::reclaimer(self)
    }

    fn stats(&self) -> StatsSnapshot {
        CbTree::stats(self)
    }

    #[inline(always)]
    fn get<'g>(&'g self, key: &'g K, guard: &'g Guard) -> Option<impl OutputHolder<V>> {
        CbTree::get(self, key, guard)
    }

    #[inline(always)]
    fn insert(&self, key: K, value: V, guard: &Guard) -> bool {
        CbTree::insert(self, key, value, guard)
            .unwrap_or_else(|_| handle_alloc_error(Node::<K, V>::layout()))
    }

    #[inline(always)]
    fn remove<'g>(&'g self, key: &'g K, guard: &'g Guard) -> Option<impl OutputHolder<V>> {
        CbTree::remove(self, key, guard)
            .unwrap_or_else(|_| handle_alloc_error(Node::<K, V>::layout()))
    }
}

/// A `BTreeMap` behind a reader-writer lock, as a baseline for the tree.
#[derive(Debug)]
pub struct LockedBTree<K, V> {
    map: RwLock<BTreeMap<K, V>>,
    reclaimer: Reclaimer,
}

impl<K, V> ConcurrentMap<K, V> for LockedBTree<K, V>
where
    K: Ord,
    V: Clone,
{
    fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            reclaimer: Reclaimer::global(),
        }
    }

    fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    fn get<'g>(&'g self, key: &'g K, _guard: &'g Guard) -> Option<impl OutputHolder<V>> {
        self.map.read().get(key).cloned()
    }

    fn insert(&self, key: K, value: V, _guard: &Guard) -> bool {
        let mut map = self.map.write();
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, value);
        true
    }

    fn remove<'g>(&'g self, key: &'g K, _guard: &'g Guard) -> Option<impl OutputHolder<V>> {
        self.map.write().remove(key)
    }
}

#[cfg(test)]
pub mod tests {
    use super::{ConcurrentMap, LockedBTree, OutputHolder};
    use crate::tree::CbTree;
    use crossbeam_utils::thread;
    use rand::prelude::*;
    use std::fmt::Debug;

    const THREADS: i32 = 30;
    const ELEMENTS_PER_THREADS: i32 = 1000;

    pub fn smoke<V, M, F>(to_value: &F)
    where
        V: Eq + Debug,
        M: ConcurrentMap<i32, V> + Send + Sync,
        F: Sync + Fn(&i32) -> V,
    {
        let map = &M::new();

        thread::scope(|s| {
            for t in 0..THREADS {
                s.spawn(move |_| {
                    let mut rng = rand::thread_rng();
                    let mut keys: Vec<i32> =
                        (0..ELEMENTS_PER_THREADS).map(|k| k * THREADS + t).collect();
                    keys.shuffle(&mut rng);
                    for i in keys {
                        assert!(map.insert(i, to_value(&i), &map.pin()));
                    }
                });
            }
        })
        .unwrap();

        thread::scope(|s| {
            for t in 0..(THREADS / 2) {
                s.spawn(move |_| {
                    let mut rng = rand::thread_rng();
                    let mut keys: Vec<i32> =
                        (0..ELEMENTS_PER_THREADS).map(|k| k * THREADS + t).collect();
                    keys.shuffle(&mut rng);
                    for i in keys {
                        let guard = map.pin();
                        assert_eq!(to_value(&i), *map.remove(&i, &guard).unwrap().output());
                    }
                });
            }
        })
        .unwrap();

        thread::scope(|s| {
            for t in (THREADS / 2)..THREADS {
                s.spawn(move |_| {
                    let mut rng = rand::thread_rng();
                    let mut keys: Vec<i32> =
                        (0..ELEMENTS_PER_THREADS).map(|k| k * THREADS + t).collect();
                    keys.shuffle(&mut rng);
                    for i in keys {
                        let guard = map.pin();
                        assert_eq!(to_value(&i), *map.get(&i, &guard).unwrap().output());
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn smoke_cbtree() {
        smoke::<_, CbTree<i32, String>, _>(&i32::to_string);
    }

    #[test]
    fn smoke_locked_btree() {
        smoke::<_, LockedBTree<i32, String>, _>(&i32::to_string);
    }
}
