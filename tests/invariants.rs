mod common;

use std::collections::BTreeMap;

use cbtree::{CbTree, Limited, NodeAllocator, Reclaimer, TreeConfig, TreeError};
use rand::prelude::*;

fn collect<K: Copy, V: Copy, A>(tree: &CbTree<K, V, A>) -> Vec<(K, V)> {
    let guard = tree.pin();
    tree.iter(&guard).map(|(k, v)| (*k, *v)).collect()
}

fn run_against_model<A>(tree: &CbTree<u32, u64, A>, seed: u64, ops: usize, range: u32)
where
    A: NodeAllocator,
{
    let mut rng = common::rng(seed);
    let mut model = BTreeMap::new();
    let guard = tree.pin();

    for i in 0..ops {
        let key = rng.gen_range(0..range);
        if rng.gen_bool(0.6) {
            let value = i as u64;
            let inserted = tree.insert(key, value, &guard).unwrap();
            assert_eq!(inserted, !model.contains_key(&key), "insert {key}");
            model.entry(key).or_insert(value);
        } else {
            let before = tree.len(&guard);
            let removed = tree.remove(&key, &guard).unwrap().copied();
            assert_eq!(removed, model.remove(&key), "remove {key}");
            let expected = if removed.is_some() { before - 1 } else { before };
            assert_eq!(tree.len(&guard), expected);
        }

        if let Err(e) = tree.validate(&guard) {
            panic!("seed {seed}, op {i}: {e}\n{}", tree.render(&guard));
        }
    }

    let expected: Vec<_> = model.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(collect(tree), expected);
    for (k, v) in &model {
        assert_eq!(tree.get(k, &guard), Some(v));
    }
}

#[test]
fn random_operations_match_model() {
    common::init_tracing();
    for seed in 0..16 {
        run_against_model(&CbTree::new(), seed, 2000, 512);
    }
}

#[test]
fn copy_on_write_matches_model() {
    common::init_tracing();
    for seed in 0..8 {
        run_against_model(
            &CbTree::with_config(TreeConfig::copy_on_write()),
            seed,
            2000,
            512,
        );
    }
}

#[test]
fn dense_keys_churn() {
    common::init_tracing();
    // Few distinct keys force most operations onto existing nodes.
    for seed in 100..108 {
        run_against_model(&CbTree::new(), seed, 3000, 16);
    }
}

#[test]
fn in_place_and_copy_on_write_agree() {
    common::init_tracing();
    let in_place = CbTree::new();
    let cow = CbTree::with_config(TreeConfig::copy_on_write());
    let (g1, g2) = (in_place.pin(), cow.pin());
    let mut rng = common::rng(7);

    for _ in 0..5000 {
        let key: u32 = rng.gen_range(0..1000);
        if rng.gen_bool(0.5) {
            assert_eq!(
                in_place.insert(key, key, &g1).unwrap(),
                cow.insert(key, key, &g2).unwrap()
            );
        } else {
            assert_eq!(
                in_place.remove(&key, &g1).unwrap().copied(),
                cow.remove(&key, &g2).unwrap().copied()
            );
        }
    }

    assert_eq!(collect(&in_place), collect(&cow));
    // The rebuilt shapes only differ in which nodes were copied.
    assert_eq!(in_place.render(&g1), cow.render(&g2));
    assert_eq!(cow.stats().in_place, 0);
    assert!(in_place.stats().allocated < cow.stats().allocated);
}

#[test]
fn scenario_delete_root() {
    common::init_tracing();
    let tree = CbTree::new();
    let guard = tree.pin();
    for key in [50, 30, 70, 20, 40, 60, 80] {
        tree.insert(key, format!("v{key}"), &guard).unwrap();
    }
    let keys: Vec<_> = tree.iter(&guard).map(|(k, _)| *k).collect();
    assert_eq!(keys, [20, 30, 40, 50, 60, 70, 80]);
    assert!(tree.height(&guard) <= 4);
    tree.validate(&guard).unwrap();

    assert_eq!(
        tree.remove(&50, &guard).unwrap().map(String::as_str),
        Some("v50")
    );
    assert_eq!(tree.root_key(&guard), Some(&60));
    tree.validate(&guard).unwrap();
    assert_eq!(tree.remove(&50, &guard), Ok(None));
    assert_eq!(tree.get(&50, &guard), None);
    assert_eq!(tree.len(&guard), 6);
}

#[test]
fn neighbour_queries_over_sorted_keys() {
    common::init_tracing();
    let tree = CbTree::new();
    let guard = tree.pin();
    let mut rng = common::rng(3);
    let mut keys: Vec<u32> = (0..300).map(|_| rng.gen_range(0..100_000)).collect();
    for &key in &keys {
        tree.insert(key, key * 2, &guard).unwrap();
    }
    keys.sort_unstable();
    keys.dedup();

    for (i, key) in keys.iter().enumerate() {
        let next = keys.get(i + 1).map(|k| (k, k * 2));
        assert_eq!(
            tree.find_greater_than(key, &guard).map(|(k, v)| (k, *v)),
            next
        );
        assert_eq!(
            tree.find_less_or_equal(key, &guard),
            Some((key, &(key * 2)))
        );
    }

    // Probes between stored keys.
    for window in keys.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        if hi - lo > 1 {
            let probe = lo + 1;
            assert_eq!(tree.find_greater_than(&probe, &guard).map(|(k, _)| *k), Some(hi));
            assert_eq!(tree.find_less_or_equal(&probe, &guard).map(|(k, _)| *k), Some(lo));
        }
    }
    if keys[0] > 0 {
        assert_eq!(tree.find_less_or_equal(&(keys[0] - 1), &guard), None);
    }
    assert_eq!(tree.find_greater_than(&keys[keys.len() - 1], &guard), None);
}

#[test]
fn delete_removes_exactly_one_entry() {
    common::init_tracing();
    let tree = CbTree::new();
    let guard = tree.pin();
    for key in 0..200u32 {
        tree.insert(key, key, &guard).unwrap();
    }

    let mut rng = common::rng(11);
    let mut order: Vec<u32> = (0..200).collect();
    order.shuffle(&mut rng);
    for (i, key) in order.iter().enumerate() {
        assert_eq!(tree.remove(key, &guard), Ok(Some(key)));
        assert_eq!(tree.len(&guard), 199 - i);
        assert_eq!(tree.remove(key, &guard), Ok(None));
        assert_eq!(tree.len(&guard), 199 - i);
        tree.validate(&guard).unwrap();
    }
    assert!(tree.is_empty(&guard));
}

#[test]
fn values_survive_unrelated_operations() {
    common::init_tracing();
    let tree = CbTree::new();
    let guard = tree.pin();
    tree.insert(u32::MAX / 2, "pinned", &guard).unwrap();

    let mut rng = common::rng(5);
    for _ in 0..3000 {
        let key = rng.gen_range(0..10_000u32);
        if rng.gen_bool(0.5) {
            tree.insert(key, "other", &guard).unwrap();
        } else {
            tree.remove(&key, &guard).unwrap();
        }
        assert_eq!(tree.get(&(u32::MAX / 2), &guard), Some(&"pinned"));
    }
}

#[test]
fn allocation_failures_leave_tree_intact() {
    common::init_tracing();
    let mut rng = common::rng(42);

    for round in 0..20 {
        let tree = CbTree::with_parts(
            TreeConfig::default().in_place(round % 2 == 0),
            Reclaimer::new(),
            Limited::new(usize::MAX),
        );
        let guard = tree.pin();
        for key in 0..256u32 {
            tree.insert(key * 4, key, &guard).unwrap();
        }

        for _ in 0..200 {
            let before = collect(&tree);
            let stats = tree.stats();
            // Enough for a leaf, rarely enough for a rebalanced path.
            tree.allocator().refill(rng.gen_range(0..6));

            let key = rng.gen_range(0..1024u32);
            let result = if rng.gen_bool(0.5) {
                tree.insert(key, key, &guard).map(|_| ())
            } else {
                tree.remove(&key, &guard).map(|_| ())
            };

            match result {
                Ok(()) => {}
                Err(TreeError::AllocationFailure { .. }) => {
                    assert_eq!(collect(&tree), before);
                    let delta = tree.stats().since(&stats);
                    assert_eq!(delta.aborted, 1);
                    assert_eq!(delta.retired, 0);
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
            tree.validate(&guard).unwrap();
        }
    }
}
