//! Structural checks and dumps, for tests and debugging.

use std::fmt::{self, Write};

use crossbeam_epoch::{Guard, Shared};

use crate::error::{Result, TreeError};
use crate::node::{Node, Side};
use crate::state::is_balanced;
use crate::tree::CbTree;

impl<K: Ord + fmt::Debug, V, A> CbTree<K, V, A> {
    /// Verifies that keys are strictly ordered, that every stored size
    /// matches its subtree and that every node is within the weight bound.
    ///
    /// Only meaningful while no writer runs concurrently.
    pub fn validate(&self, guard: &Guard) -> Result<()> {
        fn check<'g, K: Ord + fmt::Debug, V>(
            node: Shared<'g, Node<K, V>>,
            min: Option<&'g K>,
            max: Option<&'g K>,
            guard: &'g Guard,
        ) -> Result<usize> {
            let Some(node_ref) = (unsafe { node.as_ref() }) else {
                return Ok(0);
            };

            if min.map_or(false, |min| node_ref.key <= *min)
                || max.map_or(false, |max| node_ref.key >= *max)
            {
                return Err(TreeError::violation(format!(
                    "key {:?} out of order (bounds {:?}..{:?})",
                    node_ref.key, min, max
                )));
            }

            let ln = check(
                node_ref.load(Side::Left, guard),
                min,
                Some(&node_ref.key),
                guard,
            )?;
            let rn = check(
                node_ref.load(Side::Right, guard),
                Some(&node_ref.key),
                max,
                guard,
            )?;

            if node_ref.size() != 1 + ln + rn {
                return Err(TreeError::violation(format!(
                    "node {:?} records size {} but has {} nodes",
                    node_ref.key,
                    node_ref.size(),
                    1 + ln + rn
                )));
            }
            if !is_balanced(ln, rn) {
                return Err(TreeError::violation(format!(
                    "node {:?} unbalanced: {} left, {} right",
                    node_ref.key, ln, rn
                )));
            }
            Ok(1 + ln + rn)
        }

        self.check_guard(guard);
        check(self.load_root(guard), None, None, guard).map(|_| ())
    }
}

impl<K, V, A> CbTree<K, V, A> {
    /// Number of nodes on the longest root-to-leaf path.
    pub fn height(&self, guard: &Guard) -> usize {
        fn height<K, V>(node: Shared<'_, Node<K, V>>, guard: &Guard) -> usize {
            match unsafe { node.as_ref() } {
                None => 0,
                Some(node_ref) => {
                    1 + height(node_ref.load(Side::Left, guard), guard)
                        .max(height(node_ref.load(Side::Right, guard), guard))
                }
            }
        }

        self.check_guard(guard);
        height(self.load_root(guard), guard)
    }

    pub fn root_key<'g>(&'g self, guard: &'g Guard) -> Option<&'g K> {
        self.check_guard(guard);
        unsafe { self.load_root(guard).as_ref() }.map(|node| &node.key)
    }
}

impl<K: fmt::Debug, V: fmt::Debug, A> CbTree<K, V, A> {
    /// Renders the tree in order, one node per line, indented by depth.
    pub fn render(&self, guard: &Guard) -> String {
        fn render<K: fmt::Debug, V: fmt::Debug>(
            out: &mut String,
            node: Shared<'_, Node<K, V>>,
            depth: usize,
            guard: &Guard,
        ) {
            let Some(node_ref) = (unsafe { node.as_ref() }) else {
                return;
            };
            render(out, node_ref.load(Side::Left, guard), depth + 1, guard);
            let _ = writeln!(
                out,
                "{:indent$}{:?} -> {:?} [{}]",
                "",
                node_ref.key,
                node_ref.value,
                node_ref.size(),
                indent = depth * 2
            );
            render(out, node_ref.load(Side::Right, guard), depth + 1, guard);
        }

        self.check_guard(guard);
        let mut out = String::new();
        render(&mut out, self.load_root(guard), 0, guard);
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::tree::CbTree;

    #[test]
    fn render_indents_by_depth() {
        let tree = CbTree::new();
        let guard = tree.pin();
        for key in [2, 1, 3] {
            tree.insert(key, key * 10, &guard).unwrap();
        }

        assert_eq!(
            tree.render(&guard),
            "  1 -> 10 [1]\n2 -> 20 [3]\n  3 -> 30 [1]\n"
        );
        assert_eq!(tree.height(&guard), 2);
        assert_eq!(tree.root_key(&guard), Some(&2));
    }

    #[test]
    fn empty_render() {
        let tree = CbTree::<i32, i32>::new();
        let guard = tree.pin();

        assert_eq!(tree.render(&guard), "");
        assert_eq!(tree.height(&guard), 0);
        assert_eq!(tree.root_key(&guard), None);
    }
}
