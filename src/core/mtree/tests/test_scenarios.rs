// src/core/mtree/tests/test_scenarios.rs

//! End-to-end scenarios on the 10x10 integer lattice and on a seeded random
//! point stream, with the invariant checker run throughout.

use std::collections::BTreeSet;

use approx::assert_relative_eq;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{small_tree, TestTree};
use crate::core::distance::{DistanceFunction, EuclideanDistance, Point};

/// The 10x10 integer lattice in insertion order.
fn lattice() -> Vec<Point> {
    (0..10)
        .flat_map(|i| (0..10).map(move |j| Point::from((f64::from(i), f64::from(j)))))
        .collect()
}

fn lattice_tree(seed: u64) -> TestTree {
    let mut tree = small_tree(seed);
    for point in lattice() {
        tree.add(point);
    }
    tree.check_invariants();
    tree
}

#[test]
fn test_lattice_four_nearest() {
    let tree = lattice_tree(21);

    let results: Vec<_> = tree.get_nearest_by_limit(Point::from((5.1, 5.1)), 4).iter().collect();
    assert_eq!(results.len(), 4);

    let found: BTreeSet<Point> = results.iter().map(|r| r.data.clone()).collect();
    let expected: BTreeSet<Point> =
        [(5.0, 5.0), (5.0, 6.0), (6.0, 5.0), (6.0, 6.0)].iter().map(|&p| Point::from(p)).collect();
    assert_eq!(found, expected);

    // Squared distances from (5.1, 5.1): 0.02, then 0.82 twice, then 1.62.
    assert_relative_eq!(results[0].distance, 0.02_f64.sqrt(), epsilon = 1e-9);
    assert_relative_eq!(results[1].distance, 0.82_f64.sqrt(), epsilon = 1e-9);
    assert_relative_eq!(results[2].distance, 0.82_f64.sqrt(), epsilon = 1e-9);
    assert_relative_eq!(results[3].distance, 1.62_f64.sqrt(), epsilon = 1e-9);
}

#[test]
fn test_lattice_corner_range_query() {
    let tree = lattice_tree(22);

    let results: Vec<_> = tree.get_nearest_by_range(Point::from((0.0, 0.0)), 1.5).iter().collect();
    assert_eq!(results.len(), 4);

    let found: BTreeSet<Point> = results.iter().map(|r| r.data.clone()).collect();
    let expected: BTreeSet<Point> =
        [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)].iter().map(|&p| Point::from(p)).collect();
    assert_eq!(found, expected);

    for window in results.windows(2) {
        assert!(window[0].distance <= window[1].distance);
    }
}

#[test]
fn test_lattice_remove_center_and_requery() {
    let mut tree = lattice_tree(23);

    assert!(tree.remove(&Point::from((5.0, 5.0))));
    assert!(!tree.remove(&Point::from((5.0, 5.0))));
    tree.check_invariants();

    let results: Vec<_> = tree.get_nearest_by_limit(Point::from((5.1, 5.1)), 1).iter().collect();
    assert_eq!(results.len(), 1);
    assert!(
        results[0].data == Point::from((5.0, 6.0)) || results[0].data == Point::from((6.0, 5.0)),
        "with (5,5) gone the nearest lattice point is (5,6) or (6,5)"
    );
    assert_relative_eq!(results[0].distance, 0.82_f64.sqrt(), epsilon = 1e-9);
}

#[test]
fn test_lattice_round_trip_in_shuffled_order() {
    let mut tree = lattice_tree(24);
    let mut points = lattice();
    points.shuffle(&mut SmallRng::seed_from_u64(77));

    for (index, point) in points.iter().enumerate() {
        assert!(tree.remove(point), "removal #{index} must find its point");
        if index % 10 == 0 {
            tree.check_invariants();
        }
    }
    assert!(tree.is_empty());
}

#[test]
fn test_seeded_stream_keeps_invariants() {
    let mut rng = SmallRng::seed_from_u64(4242);
    let mut points = BTreeSet::new();
    while points.len() < 1000 {
        points.insert(Point::from((rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0))));
    }
    let mut points: Vec<Point> = points.into_iter().collect();
    points.shuffle(&mut rng);

    let mut tree = small_tree(25);
    for (index, point) in points.iter().enumerate() {
        tree.add(point.clone());
        if index % 10 == 9 {
            tree.check_invariants();
        }
    }
    tree.check_invariants();

    // The queryable set equals the inserted set.
    let enumerated: BTreeSet<Point> = tree
        .get_nearest_unbounded(Point::from((50.0, 50.0)))
        .iter()
        .map(|r| r.data)
        .collect();
    assert_eq!(enumerated.len(), points.len());

    // Tear half of it down again, still checking every 10 operations.
    points.shuffle(&mut rng);
    for (index, point) in points.iter().take(500).enumerate() {
        assert!(tree.remove(point));
        if index % 10 == 9 {
            tree.check_invariants();
        }
    }
    assert_eq!(
        tree.get_nearest_unbounded(Point::from((50.0, 50.0))).iter().count(),
        500
    );
}

#[test]
fn test_queries_stay_correct_under_churn() {
    // Interleave insertions and removals, comparing the tree's k-nearest
    // answer against a brute-force scan of the live set.
    let mut rng = SmallRng::seed_from_u64(987);
    let mut tree = small_tree(26);
    let mut live: Vec<Point> = Vec::new();

    for round in 0..300 {
        if !live.is_empty() && rng.gen_bool(0.3) {
            let index = rng.gen_range(0..live.len());
            let point = live.swap_remove(index);
            assert!(tree.remove(&point));
        } else {
            let point = Point::from((rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)));
            if !live.contains(&point) {
                tree.add(point.clone());
                live.push(point);
            }
        }

        if round % 25 == 0 && !live.is_empty() {
            tree.check_invariants();
            let center = Point::from((rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)));
            let got: Vec<f64> = tree
                .get_nearest_by_limit(center.clone(), 3)
                .iter()
                .map(|r| r.distance)
                .collect();

            let mut expected: Vec<f64> = live
                .iter()
                .map(|p| EuclideanDistance.distance(p, &center))
                .collect();
            expected.sort_by(f64::total_cmp);
            expected.truncate(3);

            assert_eq!(got.len(), expected.len());
            for (g, e) in got.iter().zip(&expected) {
                assert_relative_eq!(*g, *e, epsilon = 1e-9);
            }
        }
    }
}
