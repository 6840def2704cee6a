// src/lib.rs
pub mod core;

// Re-export the key types so library consumers don't need the full paths.
pub use crate::core::distance::{DistanceFunction, EuclideanDistance, Point};
pub use crate::core::mtree::{
    CapacityOptions, MTree, MTreeError, MTreeResult, Query, QueryIterator, ResultItem,
    DEFAULT_MIN_NODE_CAPACITY,
};
