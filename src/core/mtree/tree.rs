// src/core/mtree/tree.rs

//! The public M-Tree surface: construction, mutation, and query entry points.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::distance::{DistanceFunction, EuclideanDistance};

use super::error::{MTreeError, MTreeResult};
use super::node::{AddOutcome, IndexItem, Node, NodeKind, RemoveOutcome};
use super::query::Query;
use super::split::{DefaultSplitFunction, SplitFunction};

/// Minimum node capacity used when callers don't specify one.
pub const DEFAULT_MIN_NODE_CAPACITY: usize = 50;

/// Capacity configuration of an M-Tree.
///
/// `max_node_capacity` of `None` means `2 * min_node_capacity - 1`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CapacityOptions {
    pub min_node_capacity: usize,
    pub max_node_capacity: Option<usize>,
}

impl Default for CapacityOptions {
    fn default() -> Self {
        Self { min_node_capacity: DEFAULT_MIN_NODE_CAPACITY, max_node_capacity: None }
    }
}

/// Resolved configuration plus the strategy objects, shared by every
/// recursive operation.
pub(crate) struct TreeSettings<DF, SF> {
    pub(crate) min_node_capacity: usize,
    pub(crate) max_node_capacity: usize,
    pub(crate) distance_function: DF,
    pub(crate) split_function: SF,
}

/// `MTree`: a dynamic, balanced index over a metric space.
///
/// `D` is the indexed data type; it only needs a strict total order (to key
/// child maps) and `Clone`. `DF` supplies the metric and `SF` the node-split
/// strategy; both default to the reference implementations.
///
/// Mutation takes `&mut self` while queries borrow the tree immutably, so a
/// live [`Query`] statically prevents concurrent modification.
pub struct MTree<D, DF = EuclideanDistance, SF = DefaultSplitFunction> {
    pub(crate) root: Option<Node<D>>,
    pub(crate) settings: TreeSettings<DF, SF>,
}

impl<D, DF, SF> MTree<D, DF, SF>
where
    D: Ord + Clone,
    DF: DistanceFunction<D>,
    SF: SplitFunction<D>,
{
    /// Creates an empty M-Tree.
    ///
    /// # Errors
    ///
    /// Returns [`MTreeError::MinCapacityTooSmall`] if `min_node_capacity < 2`
    /// and [`MTreeError::MaxCapacityTooSmall`] if the resolved maximum does
    /// not exceed the minimum.
    pub fn new(
        min_node_capacity: usize,
        max_node_capacity: Option<usize>,
        distance_function: DF,
        split_function: SF,
    ) -> MTreeResult<Self> {
        if min_node_capacity < 2 {
            return Err(MTreeError::MinCapacityTooSmall(min_node_capacity));
        }
        let max_node_capacity = max_node_capacity.unwrap_or(2 * min_node_capacity - 1);
        if max_node_capacity <= min_node_capacity {
            return Err(MTreeError::MaxCapacityTooSmall {
                min: min_node_capacity,
                max: max_node_capacity,
            });
        }

        Ok(Self {
            root: None,
            settings: TreeSettings {
                min_node_capacity,
                max_node_capacity,
                distance_function,
                split_function,
            },
        })
    }

    /// Creates an empty M-Tree with default strategy instances.
    pub fn with_capacity(
        min_node_capacity: usize,
        max_node_capacity: Option<usize>,
    ) -> MTreeResult<Self>
    where
        DF: Default,
        SF: Default,
    {
        Self::new(min_node_capacity, max_node_capacity, DF::default(), SF::default())
    }

    /// Creates an empty M-Tree from a [`CapacityOptions`] value.
    pub fn with_options(options: CapacityOptions) -> MTreeResult<Self>
    where
        DF: Default,
        SF: Default,
    {
        Self::with_capacity(options.min_node_capacity, options.max_node_capacity)
    }

    /// Returns the minimum node capacity.
    pub fn min_node_capacity(&self) -> usize {
        self.settings.min_node_capacity
    }

    /// Returns the maximum node capacity.
    pub fn max_node_capacity(&self) -> usize {
        self.settings.max_node_capacity
    }

    /// Returns `true` if the tree holds no data.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Adds and indexes a data object.
    ///
    /// The object must not already be indexed; there is no validation and the
    /// behavior is undefined if a duplicate is added.
    pub fn add(&mut self, data: D) {
        match self.root.take() {
            None => {
                let mut root = Node::new(NodeKind::RootLeaf, data.clone());
                // The first entry coincides with the representative, so the
                // distance is zero by identity.
                match root.add_data(data, 0.0, &self.settings) {
                    AddOutcome::Ok => self.root = Some(root),
                    AddOutcome::Split(..) => {
                        unreachable!("a single entry cannot overflow a node")
                    }
                }
            }
            Some(mut root) => {
                let distance = self.settings.distance_function.distance(&data, &root.data);
                match root.add_data(data, distance, &self.settings) {
                    AddOutcome::Ok => self.root = Some(root),
                    AddOutcome::Split(first, second) => {
                        debug!("root overflow; growing the tree by one level");
                        let mut new_root = Node::new(NodeKind::Root, root.data);
                        for node in [first, second] {
                            let distance = self
                                .settings
                                .distance_function
                                .distance(&new_root.data, &node.data);
                            new_root.add_child(IndexItem::Node(node), distance, &self.settings);
                        }
                        self.root = Some(new_root);
                    }
                }
            }
        }
    }

    /// Removes a data object from the index.
    ///
    /// Returns `true` if and only if the object was found.
    pub fn remove(&mut self, data: &D) -> bool {
        let Some(root) = self.root.as_mut() else {
            return false;
        };

        let distance = self.settings.distance_function.distance(data, &root.data);
        match root.remove_data(data, distance, &self.settings) {
            RemoveOutcome::NotFound => false,
            RemoveOutcome::Removed => true,
            RemoveOutcome::UnderCapacity => {
                self.replace_root();
                true
            }
        }
    }

    /// Repairs the root after it fell below its minimum capacity: an empty
    /// root-leaf empties the tree, a root with a single child is demoted by
    /// promoting that child.
    fn replace_root(&mut self) {
        let root = self.root.take().expect("an under-capacity root exists");
        match root.kind {
            NodeKind::RootLeaf => {
                debug_assert!(root.children.is_empty());
                debug!("last entry removed; the tree is now empty");
            }
            NodeKind::Root => {
                debug_assert_eq!(root.children.len(), 1);
                let lone_child = match root.children.into_values().next() {
                    Some(IndexItem::Node(node)) => node,
                    _ => unreachable!("a root holds node children"),
                };
                let kind = if lone_child.kind.is_leaf() {
                    NodeKind::RootLeaf
                } else {
                    NodeKind::Root
                };
                debug!("root left with a single child; shrinking the tree by one level");
                let mut new_root = Node::new(kind, lone_child.data);
                for (_, grandchild) in lone_child.children {
                    let distance = self
                        .settings
                        .distance_function
                        .distance(&new_root.data, grandchild.data());
                    new_root.add_child(grandchild, distance, &self.settings);
                }
                self.root = Some(new_root);
            }
            NodeKind::Leaf | NodeKind::Internal => {
                unreachable!("the tree root always has a root kind")
            }
        }
    }

    /// Builds a nearest-neighbor query around `query_data`, constrained by
    /// both a maximum distance and a maximum number of results.
    ///
    /// `f64::INFINITY` and `usize::MAX` leave the respective dimension
    /// unconstrained. The query is lazy: the tree is only traversed as
    /// results are pulled from the iterator.
    pub fn get_nearest(&self, query_data: D, range: f64, limit: usize) -> Query<'_, D, DF, SF> {
        Query::new(self, query_data, range, limit)
    }

    /// Nearest-neighbor query constrained by distance only.
    pub fn get_nearest_by_range(&self, query_data: D, range: f64) -> Query<'_, D, DF, SF> {
        self.get_nearest(query_data, range, usize::MAX)
    }

    /// Nearest-neighbor query constrained by result count only.
    pub fn get_nearest_by_limit(&self, query_data: D, limit: usize) -> Query<'_, D, DF, SF> {
        self.get_nearest(query_data, f64::INFINITY, limit)
    }

    /// Unconstrained nearest-neighbor query: enumerates every indexed object
    /// in non-decreasing distance from `query_data`.
    pub fn get_nearest_unbounded(&self, query_data: D) -> Query<'_, D, DF, SF> {
        self.get_nearest(query_data, f64::INFINITY, usize::MAX)
    }

    /// Validates every structural invariant of the tree, panicking on the
    /// first violation. Intended for tests and debugging; it walks the whole
    /// tree and recomputes every recorded distance.
    pub fn check_invariants(&self) {
        if let Some(root) = &self.root {
            assert!(root.kind.is_root(), "the tree root must have a root kind");
            root.check(&self.settings);
        }
    }
}
