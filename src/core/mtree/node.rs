// src/core/mtree/node.rs

//! The node hierarchy and the recursive mutation paths.
//!
//! Items are a tagged union: a terminal [`Entry`] carrying one data object,
//! or a [`Node`] containing a map of child items keyed by their data. Nodes
//! come in four kinds along two axes (root or not, leaf or not); behaviors
//! that differ between the kinds (minimum capacity, child class, the kind of
//! replacement nodes a split allocates) key off [`NodeKind`], everything else
//! is shared.
//!
//! The recursive mutators communicate through returned outcome variants
//! instead of unwinding: an insertion either succeeds or hands a pair of
//! replacement nodes to the caller, a removal reports not-found or that the
//! node fell below its minimum capacity. Root replacement is resolved one
//! level up, by the tree itself.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::core::distance::DistanceFunction;

use super::split::{CachedDistanceFunction, SplitFunction};
use super::tree::TreeSettings;

/// Terminal payload of a leaf node. Its covering radius is always zero.
pub(crate) struct Entry<D> {
    pub(crate) data: D,
    pub(crate) distance_to_parent: Option<f64>,
}

impl<D> Entry<D> {
    fn new(data: D) -> Self {
        Self { data, distance_to_parent: None }
    }
}

/// The four node kinds, spanning the root/non-root and leaf/non-leaf axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// The root while it still stores entries directly.
    RootLeaf,
    /// The root once the tree has internal levels.
    Root,
    /// A non-root node storing entries.
    Leaf,
    /// A non-root node storing nodes.
    Internal,
}

impl NodeKind {
    pub(crate) fn is_root(self) -> bool {
        matches!(self, Self::RootLeaf | Self::Root)
    }

    pub(crate) fn is_leaf(self) -> bool {
        matches!(self, Self::RootLeaf | Self::Leaf)
    }

    /// The kind of the two replacement nodes allocated when a node of this
    /// kind splits. Replacements are never roots.
    fn split_replacement(self) -> Self {
        if self.is_leaf() {
            Self::Leaf
        } else {
            Self::Internal
        }
    }

    /// Minimum number of children a node of this kind must keep.
    pub(crate) fn min_capacity(self, min_node_capacity: usize) -> usize {
        match self {
            Self::RootLeaf => 1,
            Self::Root => 2,
            Self::Leaf | Self::Internal => min_node_capacity,
        }
    }
}

/// A node: a representative object, its covering radius, and a child map.
pub(crate) struct Node<D> {
    pub(crate) kind: NodeKind,
    pub(crate) data: D,
    pub(crate) radius: f64,
    pub(crate) distance_to_parent: Option<f64>,
    pub(crate) children: BTreeMap<D, IndexItem<D>>,
}

/// Either kind of child an index node can hold.
pub(crate) enum IndexItem<D> {
    Entry(Entry<D>),
    Node(Node<D>),
}

impl<D> IndexItem<D> {
    pub(crate) fn data(&self) -> &D {
        match self {
            Self::Entry(entry) => &entry.data,
            Self::Node(node) => &node.data,
        }
    }

    /// Covering radius; zero for entries.
    pub(crate) fn radius(&self) -> f64 {
        match self {
            Self::Entry(_) => 0.0,
            Self::Node(node) => node.radius,
        }
    }

    /// Exact distance from this item's data to its parent's representative.
    ///
    /// Every item reachable through a parent's child map has been linked with
    /// `update_metrics`, so the distance is always present.
    pub(crate) fn parent_distance(&self) -> f64 {
        let distance = match self {
            Self::Entry(entry) => entry.distance_to_parent,
            Self::Node(node) => node.distance_to_parent,
        };
        distance.expect("child item is always linked to a parent")
    }

    fn set_parent_distance(&mut self, distance: f64) {
        match self {
            Self::Entry(entry) => entry.distance_to_parent = Some(distance),
            Self::Node(node) => node.distance_to_parent = Some(distance),
        }
    }

    fn as_node(&self) -> Option<&Node<D>> {
        match self {
            Self::Node(node) => Some(node),
            Self::Entry(_) => None,
        }
    }

    fn as_node_mut(&mut self) -> Option<&mut Node<D>> {
        match self {
            Self::Node(node) => Some(node),
            Self::Entry(_) => None,
        }
    }
}

/// Outcome of a recursive insertion.
pub(crate) enum AddOutcome<D> {
    /// The subtree absorbed the object.
    Ok,
    /// The node overflowed and split; the caller replaces it with the pair.
    Split(Node<D>, Node<D>),
}

/// Outcome of a recursive removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoveOutcome {
    /// The object was removed and the node kept its minimum capacity.
    Removed,
    /// The object is not stored in this subtree.
    NotFound,
    /// The object was removed and the node fell below its minimum capacity.
    UnderCapacity,
}

impl<D: Ord + Clone> Node<D> {
    pub(crate) fn new(kind: NodeKind, data: D) -> Self {
        Self { kind, data, radius: 0.0, distance_to_parent: None, children: BTreeMap::new() }
    }

    /// Links a freshly inserted or re-parented child: records its exact
    /// distance to this node and widens the covering radius to keep the
    /// child's whole ball inside.
    fn update_metrics(&mut self, key: &D, distance: f64) {
        if let Some(child) = self.children.get_mut(key) {
            child.set_parent_distance(distance);
            let reach = distance + child.radius();
            if reach > self.radius {
                self.radius = reach;
            }
        }
    }

    /// Re-widens the radius against one child after its subtree changed.
    /// Radii are never tightened, only grown.
    fn update_radius(&mut self, key: &D) {
        if let Some(child) = self.children.get(key) {
            let reach = child.parent_distance() + child.radius();
            if reach > self.radius {
                self.radius = reach;
            }
        }
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts `data` into this subtree. `distance` is the already-computed
    /// distance from `data` to this node's representative.
    pub(crate) fn add_data<DF, SF>(
        &mut self,
        data: D,
        distance: f64,
        settings: &TreeSettings<DF, SF>,
    ) -> AddOutcome<D>
    where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        self.do_add_data(data, distance, settings);
        match self.check_max_capacity(settings) {
            Some((first, second)) => AddOutcome::Split(first, second),
            None => AddOutcome::Ok,
        }
    }

    fn do_add_data<DF, SF>(&mut self, data: D, distance: f64, settings: &TreeSettings<DF, SF>)
    where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        if self.kind.is_leaf() {
            debug_assert!(!self.children.contains_key(&data));
            let key = data.clone();
            self.children.insert(key.clone(), IndexItem::Entry(Entry::new(data)));
            self.update_metrics(&key, distance);
            return;
        }

        // Descend into the child that needs no radius increase and is nearest,
        // or failing that, the child whose radius grows the least.
        let mut nearest_covering: Option<(D, f64)> = None;
        let mut smallest_increase: Option<(D, f64, f64)> = None;
        for (key, item) in &self.children {
            let child = item.as_node().expect("internal nodes hold only nodes");
            let child_distance = settings.distance_function.distance(&child.data, &data);
            if child_distance <= child.radius {
                let better = nearest_covering
                    .as_ref()
                    .map_or(true, |(_, best)| child_distance < *best);
                if better {
                    nearest_covering = Some((key.clone(), child_distance));
                }
            } else {
                let increase = child_distance - child.radius;
                let better = smallest_increase
                    .as_ref()
                    .map_or(true, |(_, _, best)| increase < *best);
                if better {
                    smallest_increase = Some((key.clone(), child_distance, increase));
                }
            }
        }

        let (chosen_key, chosen_distance) = match nearest_covering {
            Some(chosen) => chosen,
            None => {
                let (key, distance, _) =
                    smallest_increase.expect("internal node has at least one child");
                (key, distance)
            }
        };

        let outcome = {
            let child = self
                .children
                .get_mut(&chosen_key)
                .and_then(IndexItem::as_node_mut)
                .expect("chosen child exists");
            child.add_data(data, chosen_distance, settings)
        };

        match outcome {
            AddOutcome::Ok => self.update_radius(&chosen_key),
            AddOutcome::Split(first, second) => {
                self.children.remove(&chosen_key);
                for new_child in [first, second] {
                    let distance =
                        settings.distance_function.distance(&self.data, &new_child.data);
                    self.add_child(IndexItem::Node(new_child), distance, settings);
                }
            }
        }
    }

    // =========================================================================
    // Split
    // =========================================================================

    /// Splits this node if it exceeds the maximum capacity, returning the two
    /// replacement nodes. The split leaves this node childless; the caller is
    /// responsible for discarding it.
    pub(crate) fn check_max_capacity<DF, SF>(
        &mut self,
        settings: &TreeSettings<DF, SF>,
    ) -> Option<(Node<D>, Node<D>)>
    where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        if self.children.len() <= settings.max_node_capacity {
            return None;
        }

        debug!("splitting {:?} node holding {} children", self.kind, self.children.len());

        let mut first_partition: BTreeSet<D> = self.children.keys().cloned().collect();
        let mut second_partition = BTreeSet::new();
        let cached = CachedDistanceFunction::new(&settings.distance_function);
        let (first_promoted, second_promoted) =
            settings.split_function.split(&mut first_partition, &mut second_partition, &cached);

        let mut orphans = std::mem::take(&mut self.children);
        let replacement_kind = self.kind.split_replacement();
        let [first_node, second_node] =
            [(first_promoted, first_partition), (second_promoted, second_partition)].map(
                |(promoted, partition)| {
                    let mut node = Node::new(replacement_kind, promoted);
                    for key in partition {
                        if let Some(child) = orphans.remove(&key) {
                            let distance = cached.distance(&node.data, &key);
                            node.add_child(child, distance, settings);
                        }
                    }
                    node
                },
            );
        debug_assert!(orphans.is_empty());

        Some((first_node, second_node))
    }

    /// Links `child` under this node with the given known distance.
    pub(crate) fn add_child<DF, SF>(
        &mut self,
        child: IndexItem<D>,
        distance: f64,
        settings: &TreeSettings<DF, SF>,
    ) where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        if self.kind.is_leaf() {
            debug_assert!(matches!(child, IndexItem::Entry(_)));
            let key = child.data().clone();
            debug_assert!(!self.children.contains_key(&key));
            self.children.insert(key.clone(), child);
            self.update_metrics(&key, distance);
            return;
        }

        match child {
            IndexItem::Node(node) => self.add_child_node(node, distance, settings),
            IndexItem::Entry(_) => unreachable!("internal nodes hold only nodes"),
        }
    }

    /// Links a node child, absorbing key collisions.
    ///
    /// During cascading splits a freshly promoted pivot can carry the same
    /// key as an existing child. The incoming node's children are then
    /// transferred into the existing child, reusing their recorded parent
    /// distances (valid since both parents share the same representative),
    /// and any split that transfer provokes is queued until the worklist
    /// drains.
    fn add_child_node<DF, SF>(
        &mut self,
        node: Node<D>,
        distance: f64,
        settings: &TreeSettings<DF, SF>,
    ) where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        let mut pending = vec![(node, distance)];
        while let Some((incoming, incoming_distance)) = pending.pop() {
            if !self.children.contains_key(&incoming.data) {
                let key = incoming.data.clone();
                self.children.insert(key.clone(), IndexItem::Node(incoming));
                self.update_metrics(&key, incoming_distance);
                continue;
            }

            let key = incoming.data.clone();
            let split = {
                let existing = self
                    .children
                    .get_mut(&key)
                    .and_then(IndexItem::as_node_mut)
                    .expect("colliding child is a node");
                for (_, grandchild) in incoming.children {
                    let grandchild_distance = grandchild.parent_distance();
                    existing.add_child(grandchild, grandchild_distance, settings);
                }
                existing.check_max_capacity(settings)
            };

            if let Some((first, second)) = split {
                self.children.remove(&key);
                for new_child in [first, second] {
                    let new_distance =
                        settings.distance_function.distance(&self.data, &new_child.data);
                    pending.push((new_child, new_distance));
                }
            }
        }
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Removes `data` from this subtree. `distance` is the already-computed
    /// distance from `data` to this node's representative.
    pub(crate) fn remove_data<DF, SF>(
        &mut self,
        data: &D,
        distance: f64,
        settings: &TreeSettings<DF, SF>,
    ) -> RemoveOutcome
    where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        match self.do_remove_data(data, distance, settings) {
            RemoveOutcome::Removed
                if self.children.len() < self.kind.min_capacity(settings.min_node_capacity) =>
            {
                RemoveOutcome::UnderCapacity
            }
            outcome => outcome,
        }
    }

    fn do_remove_data<DF, SF>(
        &mut self,
        data: &D,
        distance: f64,
        settings: &TreeSettings<DF, SF>,
    ) -> RemoveOutcome
    where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        if self.kind.is_leaf() {
            return if self.children.remove(data).is_some() {
                RemoveOutcome::Removed
            } else {
                RemoveOutcome::NotFound
            };
        }

        // The triangle inequality bounds the distance from `data` to any
        // child's ball: children with |d(data, self) - d(child, self)| beyond
        // their radius cannot contain it.
        let mut candidates: Vec<(D, f64)> = Vec::new();
        for (key, item) in &self.children {
            let child = item.as_node().expect("internal nodes hold only nodes");
            if (distance - child.distance_to_parent.expect("child item is always linked to a parent")).abs() <= child.radius {
                let child_distance = settings.distance_function.distance(data, &child.data);
                if child_distance <= child.radius {
                    candidates.push((key.clone(), child_distance));
                }
            }
        }

        for (key, child_distance) in candidates {
            let outcome = {
                let child = self
                    .children
                    .get_mut(&key)
                    .and_then(IndexItem::as_node_mut)
                    .expect("candidate child exists");
                child.remove_data(data, child_distance, settings)
            };
            match outcome {
                RemoveOutcome::NotFound => continue,
                RemoveOutcome::Removed => {
                    self.update_radius(&key);
                    return RemoveOutcome::Removed;
                }
                RemoveOutcome::UnderCapacity => {
                    let expanded = self.balance_children(&key, settings);
                    self.update_radius(&expanded);
                    return RemoveOutcome::Removed;
                }
            }
        }

        RemoveOutcome::NotFound
    }

    /// Repairs an under-capacity child, either by borrowing the nearest
    /// sibling's closest grandchild (donate) or by folding the child into its
    /// nearest minimally-filled sibling (merge). Returns the key of the node
    /// that grew and whose radius the caller must re-check.
    fn balance_children<DF, SF>(
        &mut self,
        child_key: &D,
        settings: &TreeSettings<DF, SF>,
    ) -> D
    where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        let child_data = self
            .children
            .get(child_key)
            .and_then(IndexItem::as_node)
            .expect("under-capacity child exists")
            .data
            .clone();

        let mut nearest_donor: Option<(D, f64)> = None;
        let mut nearest_merge_candidate: Option<(D, f64)> = None;
        for (key, item) in &self.children {
            if key == child_key {
                continue;
            }
            let sibling = item.as_node().expect("internal nodes hold only nodes");
            let sibling_distance =
                settings.distance_function.distance(&child_data, &sibling.data);
            let can_donate = sibling.children.len()
                > sibling.kind.min_capacity(settings.min_node_capacity);
            let slot = if can_donate { &mut nearest_donor } else { &mut nearest_merge_candidate };
            if slot.as_ref().map_or(true, |(_, best)| sibling_distance < *best) {
                *slot = Some((key.clone(), sibling_distance));
            }
        }

        if let Some((donor_key, _)) = nearest_donor {
            // Move the donor's grandchild closest to the shrunken child.
            let (grandchild_key, grandchild_distance) = {
                let donor = self
                    .children
                    .get(&donor_key)
                    .and_then(IndexItem::as_node)
                    .expect("donor exists");
                let mut best: Option<(D, f64)> = None;
                for (key, grandchild) in &donor.children {
                    let candidate_distance =
                        settings.distance_function.distance(grandchild.data(), &child_data);
                    if best.as_ref().map_or(true, |(_, nearest)| candidate_distance < *nearest) {
                        best = Some((key.clone(), candidate_distance));
                    }
                }
                best.expect("donor has children above its minimum")
            };

            debug!("rebalancing by donation from the nearest sibling");
            let grandchild = self
                .children
                .get_mut(&donor_key)
                .and_then(IndexItem::as_node_mut)
                .expect("donor exists")
                .children
                .remove(&grandchild_key)
                .expect("selected grandchild exists");
            let child = self
                .children
                .get_mut(child_key)
                .and_then(IndexItem::as_node_mut)
                .expect("under-capacity child exists");
            child.add_child(grandchild, grandchild_distance, settings);
            child_key.clone()
        } else {
            let (merge_key, _) = nearest_merge_candidate
                .expect("a non-root node always has at least one sibling");
            debug!("rebalancing by merging into the nearest sibling");

            let under_capacity = match self.children.remove(child_key) {
                Some(IndexItem::Node(node)) => node,
                _ => unreachable!("internal nodes hold only nodes"),
            };
            let target = self
                .children
                .get_mut(&merge_key)
                .and_then(IndexItem::as_node_mut)
                .expect("merge candidate exists");
            for (_, grandchild) in under_capacity.children {
                let grandchild_distance =
                    settings.distance_function.distance(grandchild.data(), &target.data);
                target.add_child(grandchild, grandchild_distance, settings);
            }
            merge_key
        }
    }

    // =========================================================================
    // Invariant checking
    // =========================================================================

    /// Validates the subtree rooted at this node and returns its height.
    ///
    /// Checks every structural invariant: exact parent distances, covering
    /// radii, capacity bounds, child-class homogeneity, key consistency, and
    /// equal depth of all leaves.
    pub(crate) fn check<DF, SF>(&self, settings: &TreeSettings<DF, SF>) -> usize
    where
        DF: DistanceFunction<D>,
        SF: SplitFunction<D>,
    {
        assert!(self.radius >= 0.0, "covering radius must be non-negative");
        if self.kind.is_root() {
            assert!(self.distance_to_parent.is_none(), "root records no parent distance");
        } else {
            assert!(self.distance_to_parent.is_some(), "non-root records its parent distance");
        }

        let min = self.kind.min_capacity(settings.min_node_capacity);
        assert!(
            self.children.len() >= min,
            "node below minimum capacity: {} < {}",
            self.children.len(),
            min
        );
        assert!(
            self.children.len() <= settings.max_node_capacity,
            "node above maximum capacity: {} > {}",
            self.children.len(),
            settings.max_node_capacity
        );

        let mut child_height: Option<usize> = None;
        for (key, child) in &self.children {
            assert!(key == child.data(), "child map key must equal the child's data");

            let exact = settings.distance_function.distance(child.data(), &self.data);
            let recorded = child.parent_distance();
            assert!(
                approx_eq(recorded, exact),
                "recorded parent distance {recorded} differs from exact distance {exact}"
            );
            assert!(
                approx_le(recorded + child.radius(), self.radius),
                "child ball ({} + {}) escapes the covering radius {}",
                recorded,
                child.radius(),
                self.radius
            );

            let height = match child {
                IndexItem::Entry(_) => {
                    assert!(self.kind.is_leaf(), "entries live only under leaf nodes");
                    1
                }
                IndexItem::Node(node) => {
                    assert!(!self.kind.is_leaf(), "nodes live only under internal nodes");
                    assert!(!node.kind.is_root(), "non-root position holds a non-root kind");
                    node.check(settings)
                }
            };
            match child_height {
                None => child_height = Some(height),
                Some(known) => {
                    assert_eq!(known, height, "all leaves must sit at the same depth")
                }
            }
        }

        child_height.map_or(1, |height| height + 1)
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(1.0)
}

fn approx_le(a: f64, b: f64) -> bool {
    a <= b + 1e-9 * b.abs().max(1.0)
}
