//! A concurrent weight-balanced binary search tree.
//!
//! [`CbTree`] serializes writers on an internal lock while readers traverse
//! it without any locking. Every mutation builds the changed part of the
//! tree off to the side and publishes it at once, so a reader sees each
//! operation either entirely or not at all. Nodes a mutation replaces are
//! reclaimed through [`crossbeam_epoch`] once no pinned reader can still
//! reach them.
//!
//! ```
//! use cbtree::CbTree;
//!
//! let tree = CbTree::new();
//! let guard = tree.pin();
//! tree.insert(2, "two", &guard).unwrap();
//! tree.insert(1, "one", &guard).unwrap();
//!
//! assert_eq!(tree.get(&1, &guard), Some(&"one"));
//! assert_eq!(tree.find_greater_than(&1, &guard), Some((&2, &"two")));
//! assert_eq!(tree.remove(&2, &guard), Ok(Some(&"two")));
//! ```

mod alloc;
mod check;
mod concurrent_map;
pub mod config;
mod error;
mod node;
mod reclaim;
mod state;
mod stats;
mod tree;

pub use alloc::{Global, Limited, NodeAllocator};
pub use concurrent_map::{ConcurrentMap, LockedBTree, OutputHolder};
pub use config::TreeConfig;
pub use error::{Result, TreeError};
pub use reclaim::Reclaimer;
pub use stats::StatsSnapshot;
pub use tree::{CbTree, Iter};
