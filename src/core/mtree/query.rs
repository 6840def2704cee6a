// src/core/mtree/query.rs

//! Incremental nearest-neighbor queries.
//!
//! A [`Query`] is a lazy container: building one performs no work, and the
//! traversal runs interleaved with iteration, so by the time the n-th result
//! is out only the work needed to identify the first n results has been done.
//!
//! The iterator is a best-first traversal over two min-priority queues: one
//! of pending nodes keyed by a lower bound on the distance to anything stored
//! beneath them, one of candidate entries keyed by their exact distance. An
//! entry is emitted only once no pending branch could still produce anything
//! closer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::core::distance::DistanceFunction;

use super::node::{Entry, IndexItem, Node};
use super::tree::MTree;

/// One query result: a neighbor and its distance from the query data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem<D> {
    /// The neighbor's data object.
    pub data: D,
    /// Distance from the neighbor to the query data.
    pub distance: f64,
}

/// A lazy nearest-neighbor query over an M-Tree.
///
/// Results come out in non-decreasing distance from the query data, at most
/// `limit` of them, all within `range`. The query borrows the tree, so the
/// tree cannot be mutated while the query or any of its iterators is alive.
pub struct Query<'a, D, DF, SF> {
    tree: &'a MTree<D, DF, SF>,
    data: D,
    range: f64,
    limit: usize,
}

impl<'a, D, DF, SF> Query<'a, D, DF, SF>
where
    D: Ord + Clone,
    DF: DistanceFunction<D>,
{
    pub(crate) fn new(tree: &'a MTree<D, DF, SF>, data: D, range: f64, limit: usize) -> Self {
        Self { tree, data, range, limit }
    }

    /// Starts the query, returning an iterator over its results.
    pub fn iter(&self) -> QueryIterator<'_, D, DF, SF> {
        QueryIterator::new(self)
    }
}

impl<'q, 't: 'q, D, DF, SF> IntoIterator for &'q Query<'t, D, DF, SF>
where
    D: Ord + Clone,
    DF: DistanceFunction<D>,
{
    type Item = ResultItem<D>;
    type IntoIter = QueryIterator<'q, D, DF, SF>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A node awaiting expansion, with its lower bound on reachable distances.
struct PendingItem<'a, D> {
    node: &'a Node<D>,
    distance: f64,
    min_distance: f64,
}

/// A candidate entry not yet known to be emittable.
struct NearestItem<'a, D> {
    entry: &'a Entry<D>,
    distance: f64,
    min_distance: f64,
}

// Both heaps order on `min_distance` with the comparison reversed, turning
// std's max-heap into the min-heap the traversal needs. For entries the
// covering radius is zero, so `min_distance` equals the exact distance.

impl<D> PartialEq for PendingItem<'_, D> {
    fn eq(&self, other: &Self) -> bool {
        self.min_distance == other.min_distance
    }
}

impl<D> Eq for PendingItem<'_, D> {}

impl<D> PartialOrd for PendingItem<'_, D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D> Ord for PendingItem<'_, D> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.min_distance.total_cmp(&self.min_distance)
    }
}

impl<D> PartialEq for NearestItem<'_, D> {
    fn eq(&self, other: &Self) -> bool {
        self.min_distance == other.min_distance
    }
}

impl<D> Eq for NearestItem<'_, D> {}

impl<D> PartialOrd for NearestItem<'_, D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D> Ord for NearestItem<'_, D> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.min_distance.total_cmp(&self.min_distance)
    }
}

/// Iterator over the results of a [`Query`].
pub struct QueryIterator<'a, D, DF, SF> {
    tree: &'a MTree<D, DF, SF>,
    query_data: &'a D,
    range: f64,
    limit: usize,
    pending_queue: BinaryHeap<PendingItem<'a, D>>,
    nearest_queue: BinaryHeap<NearestItem<'a, D>>,
    next_pending_min_distance: f64,
    yielded_count: usize,
}

impl<'a, D, DF, SF> QueryIterator<'a, D, DF, SF>
where
    D: Ord + Clone,
    DF: DistanceFunction<D>,
{
    fn new(query: &'a Query<'a, D, DF, SF>) -> Self {
        let mut iterator = Self {
            tree: query.tree,
            query_data: &query.data,
            range: query.range,
            limit: query.limit,
            pending_queue: BinaryHeap::new(),
            nearest_queue: BinaryHeap::new(),
            next_pending_min_distance: f64::INFINITY,
            yielded_count: 0,
        };

        if let Some(root) = &query.tree.root {
            let distance =
                query.tree.settings.distance_function.distance(&query.data, &root.data);
            let min_distance = (distance - root.radius).max(0.0);
            iterator.pending_queue.push(PendingItem { node: root, distance, min_distance });
            iterator.next_pending_min_distance = min_distance;
        }

        iterator
    }

    /// Emits the top candidate entry if no pending branch can beat it.
    fn prepare_next_nearest(&mut self) -> Option<ResultItem<D>> {
        let emittable = self
            .nearest_queue
            .peek()
            .is_some_and(|nearest| nearest.distance <= self.next_pending_min_distance);
        if !emittable {
            return None;
        }

        let nearest = self.nearest_queue.pop().expect("peeked entry is present");
        self.yielded_count += 1;
        Some(ResultItem { data: nearest.entry.data.clone(), distance: nearest.distance })
    }
}

impl<D, DF, SF> Iterator for QueryIterator<'_, D, DF, SF>
where
    D: Ord + Clone,
    DF: DistanceFunction<D>,
{
    type Item = ResultItem<D>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded_count >= self.limit {
            return None;
        }

        while !(self.pending_queue.is_empty() && self.nearest_queue.is_empty()) {
            if let Some(result) = self.prepare_next_nearest() {
                return Some(result);
            }

            // No emittable entry, so some pending node holds the smallest
            // lower bound; expand it.
            let pending = self.pending_queue.pop().expect("a pending node remains");
            for child in pending.node.children.values() {
                let pruned = (pending.distance - child.parent_distance()).abs() - child.radius()
                    > self.range;
                if pruned {
                    continue;
                }

                let child_distance = self
                    .tree
                    .settings
                    .distance_function
                    .distance(self.query_data, child.data());
                let child_min_distance = (child_distance - child.radius()).max(0.0);
                if child_min_distance > self.range {
                    continue;
                }

                match child {
                    IndexItem::Entry(entry) => self.nearest_queue.push(NearestItem {
                        entry,
                        distance: child_distance,
                        min_distance: child_min_distance,
                    }),
                    IndexItem::Node(node) => self.pending_queue.push(PendingItem {
                        node,
                        distance: child_distance,
                        min_distance: child_min_distance,
                    }),
                }
            }

            self.next_pending_min_distance = self
                .pending_queue
                .peek()
                .map_or(f64::INFINITY, |pending| pending.min_distance);
        }

        None
    }
}
