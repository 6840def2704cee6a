// src/core/mtree/split.rs

//! Node-split strategies: promotion, partition, and the per-split distance cache.
//!
//! A split is the composition of a promotion function (pick two pivots from
//! the overflowing node's children) and a partition function (assign every
//! child to one of the pivots). Both are pluggable; the reference strategies
//! are uniform random promotion and balanced partition.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::core::distance::DistanceFunction;

/// Picks two distinct pivot objects from a to-be-split set.
pub trait PromotionFunction<D> {
    /// Returns two distinct objects drawn from `candidates`.
    ///
    /// `candidates` always holds at least two objects when called by the tree.
    fn promote(
        &self,
        candidates: &BTreeSet<D>,
        distance_function: &dyn DistanceFunction<D>,
    ) -> (D, D);
}

/// Distributes a set of objects between the two promoted pivots.
pub trait PartitionFunction<D> {
    /// Moves every object of `first_partition` into exactly one of the two
    /// partitions. On return the partitions must be disjoint, non-empty, and
    /// their union must equal the input set.
    fn partition(
        &self,
        promoted: (&D, &D),
        first_partition: &mut BTreeSet<D>,
        second_partition: &mut BTreeSet<D>,
        distance_function: &dyn DistanceFunction<D>,
    );
}

/// A complete split strategy: promotion followed by partition.
///
/// Custom implementations must leave the input partitioned into two
/// non-empty disjoint subsets; a strategy that ever grows the working set can
/// keep the cascading-split machinery from terminating.
pub trait SplitFunction<D> {
    /// Promotes two pivots and partitions `first_partition` between them.
    ///
    /// On entry `first_partition` holds every object to distribute and
    /// `second_partition` is empty. Returns the promoted pair.
    fn split(
        &self,
        first_partition: &mut BTreeSet<D>,
        second_partition: &mut BTreeSet<D>,
        distance_function: &dyn DistanceFunction<D>,
    ) -> (D, D);
}

/// Promotion strategy that picks two objects uniformly at random without
/// replacement.
pub struct RandomPromotion {
    rng: RefCell<SmallRng>,
}

impl RandomPromotion {
    /// Creates a promotion strategy seeded from system entropy.
    pub fn new() -> Self {
        Self { rng: RefCell::new(SmallRng::from_entropy()) }
    }

    /// Creates a deterministically seeded promotion strategy.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: RefCell::new(SmallRng::seed_from_u64(seed)) }
    }
}

impl Default for RandomPromotion {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RandomPromotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RandomPromotion")
    }
}

impl<D: Ord + Clone> PromotionFunction<D> for RandomPromotion {
    fn promote(
        &self,
        candidates: &BTreeSet<D>,
        _distance_function: &dyn DistanceFunction<D>,
    ) -> (D, D) {
        let mut rng = self.rng.borrow_mut();
        let picked = rand::seq::index::sample(&mut *rng, candidates.len(), 2);
        let (first_index, second_index) = (picked.index(0), picked.index(1));
        let (low, high) = if first_index < second_index {
            (first_index, second_index)
        } else {
            (second_index, first_index)
        };

        let mut iter = candidates.iter();
        let low_pick = iter.nth(low).cloned().expect("promotion requires two candidates");
        let high_pick =
            iter.nth(high - low - 1).cloned().expect("promotion requires two candidates");

        if first_index < second_index {
            (low_pick, high_pick)
        } else {
            (high_pick, low_pick)
        }
    }
}

/// Partition strategy that balances the two partitions while preferring
/// proximity.
///
/// The input is sorted twice, once by distance to each pivot, and the two
/// sorted sequences are consumed in alternating rounds: the next unassigned
/// object nearest the first pivot goes to the first partition, then the next
/// unassigned object nearest the second pivot goes to the second partition.
/// Equal distances are broken by the natural order of the data, which keeps
/// the assignment deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedPartition;

impl<D: Ord + Clone> PartitionFunction<D> for BalancedPartition {
    fn partition(
        &self,
        promoted: (&D, &D),
        first_partition: &mut BTreeSet<D>,
        second_partition: &mut BTreeSet<D>,
        distance_function: &dyn DistanceFunction<D>,
    ) {
        let sorted_by_distance_to = |pivot: &D| -> Vec<D> {
            let mut decorated: Vec<(f64, D)> = first_partition
                .iter()
                .map(|data| (distance_function.distance(data, pivot), data.clone()))
                .collect();
            decorated.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.cmp(b)));
            decorated.into_iter().map(|(_, data)| data).collect()
        };

        let queue1 = sorted_by_distance_to(promoted.0);
        let queue2 = sorted_by_distance_to(promoted.1);

        first_partition.clear();

        let mut iter1 = queue1.into_iter();
        let mut iter2 = queue2.into_iter();
        loop {
            let mut assigned1 = false;
            for data in iter1.by_ref() {
                if !second_partition.contains(&data) {
                    first_partition.insert(data);
                    assigned1 = true;
                    break;
                }
            }

            let mut assigned2 = false;
            for data in iter2.by_ref() {
                if !first_partition.contains(&data) {
                    second_partition.insert(data);
                    assigned2 = true;
                    break;
                }
            }

            if !assigned1 && !assigned2 {
                break;
            }
        }
    }
}

/// A split function composed from a promotion function and a partition
/// function.
#[derive(Debug, Default)]
pub struct ComposedSplitFunction<P, Q> {
    promotion_function: P,
    partition_function: Q,
}

impl<P, Q> ComposedSplitFunction<P, Q> {
    /// Composes a split function from the given strategies.
    pub fn new(promotion_function: P, partition_function: Q) -> Self {
        Self { promotion_function, partition_function }
    }
}

impl<D, P, Q> SplitFunction<D> for ComposedSplitFunction<P, Q>
where
    P: PromotionFunction<D>,
    Q: PartitionFunction<D>,
{
    fn split(
        &self,
        first_partition: &mut BTreeSet<D>,
        second_partition: &mut BTreeSet<D>,
        distance_function: &dyn DistanceFunction<D>,
    ) -> (D, D) {
        let promoted = self.promotion_function.promote(first_partition, distance_function);
        self.partition_function.partition(
            (&promoted.0, &promoted.1),
            first_partition,
            second_partition,
            distance_function,
        );
        promoted
    }
}

/// The reference split strategy: random promotion with balanced partition.
pub type DefaultSplitFunction = ComposedSplitFunction<RandomPromotion, BalancedPartition>;

/// Memoizing wrapper around a distance function, scoped to a single split.
///
/// The cache key is the unordered pair of the two arguments, so a lookup for
/// `(y, x)` hits an entry stored for `(x, y)`. One instance lives exactly as
/// long as one capacity check and is dropped when the split completes.
pub struct CachedDistanceFunction<'a, D, DF> {
    distance_function: &'a DF,
    cache: RefCell<BTreeMap<(D, D), f64>>,
}

impl<'a, D, DF> CachedDistanceFunction<'a, D, DF>
where
    D: Ord + Clone,
    DF: DistanceFunction<D>,
{
    /// Wraps `distance_function` with a fresh, empty cache.
    pub fn new(distance_function: &'a DF) -> Self {
        Self { distance_function, cache: RefCell::new(BTreeMap::new()) }
    }
}

impl<D, DF> DistanceFunction<D> for CachedDistanceFunction<'_, D, DF>
where
    D: Ord + Clone,
    DF: DistanceFunction<D>,
{
    fn distance(&self, a: &D, b: &D) -> f64 {
        let key = if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
        if let Some(cached) = self.cache.borrow().get(&key) {
            return *cached;
        }

        let distance = self.distance_function.distance(a, b);
        self.cache.borrow_mut().insert(key, distance);
        distance
    }
}
