pub mod bench;
mod tree;

pub use tree::TreeConfig;
