//! Hierarchical cache of remote node state

pub mod nodes;

pub use nodes::NodeCache;
