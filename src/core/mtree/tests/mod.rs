// src/core/mtree/tests/mod.rs

mod test_queries;
mod test_scenarios;

use crate::core::distance::{EuclideanDistance, Point};
use crate::core::mtree::split::{BalancedPartition, ComposedSplitFunction, RandomPromotion};
use crate::core::mtree::MTree;

pub(crate) type TestTree =
    MTree<Point, EuclideanDistance, ComposedSplitFunction<RandomPromotion, BalancedPartition>>;

/// Small tree used by most scenarios: capacities 2..=3, seeded promotion.
pub(crate) fn small_tree(seed: u64) -> TestTree {
    MTree::new(
        2,
        Some(3),
        EuclideanDistance,
        ComposedSplitFunction::new(RandomPromotion::with_seed(seed), BalancedPartition),
    )
    .expect("capacities 2..=3 are valid")
}
