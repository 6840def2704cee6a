// src/core/mtree/tests/test_queries.rs

use approx::assert_relative_eq;

use super::small_tree;
use crate::core::distance::Point;

#[test]
fn test_single_point_query() {
    let mut tree = small_tree(1);
    tree.add(Point::from((0.0, 0.0)));

    let results: Vec<_> = tree.get_nearest_by_limit(Point::from((10.0, 10.0)), 1).iter().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].data, Point::from((0.0, 0.0)));
    assert_relative_eq!(results[0].distance, 200.0_f64.sqrt(), epsilon = 1e-9);
}

#[test]
fn test_unit_square_nearest_two() {
    let mut tree = small_tree(2);
    for point in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
        tree.add(Point::from(point));
        tree.check_invariants();
    }

    let results: Vec<_> = tree.get_nearest_by_limit(Point::from((2.0, 2.0)), 2).iter().collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].data, Point::from((1.0, 1.0)));
    assert_relative_eq!(results[0].distance, 2.0_f64.sqrt(), epsilon = 1e-9);
    // (1,0) and (0,1) tie; either may come second but the distance is fixed.
    assert!(
        results[1].data == Point::from((1.0, 0.0)) || results[1].data == Point::from((0.0, 1.0))
    );
    assert_relative_eq!(results[1].distance, 5.0_f64.sqrt(), epsilon = 1e-9);
}

#[test]
fn test_limit_zero_yields_nothing() {
    let mut tree = small_tree(3);
    for i in 0..10 {
        tree.add(Point::from((f64::from(i), 0.0)));
    }
    assert_eq!(tree.get_nearest_by_limit(Point::from((0.0, 0.0)), 0).iter().count(), 0);
}

#[test]
fn test_range_zero_yields_only_exact_matches() {
    let mut tree = small_tree(4);
    for i in 0..10 {
        tree.add(Point::from((f64::from(i), 0.0)));
    }

    let results: Vec<_> = tree.get_nearest_by_range(Point::from((3.0, 0.0)), 0.0).iter().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].data, Point::from((3.0, 0.0)));
    assert_eq!(results[0].distance, 0.0);

    // A query point stored nowhere matches nothing at range zero.
    assert_eq!(tree.get_nearest_by_range(Point::from((3.5, 0.0)), 0.0).iter().count(), 0);
}

#[test]
fn test_unconstrained_query_enumerates_everything_in_order() {
    let mut tree = small_tree(5);
    let points: Vec<Point> =
        (0..25).map(|i| Point::from((f64::from(i % 5), f64::from(i / 5)))).collect();
    for point in &points {
        tree.add(point.clone());
    }

    let center = Point::from((2.3, 1.7));
    let results: Vec<_> = tree.get_nearest_unbounded(center).iter().collect();

    assert_eq!(results.len(), points.len());
    for window in results.windows(2) {
        assert!(
            window[0].distance <= window[1].distance,
            "results must come out in non-decreasing distance"
        );
    }

    let mut seen: Vec<Point> = results.iter().map(|r| r.data.clone()).collect();
    seen.sort();
    let mut expected = points.clone();
    expected.sort();
    assert_eq!(seen, expected, "each stored point is enumerated exactly once");
}

#[test]
fn test_constrained_query_is_a_prefix_of_the_unconstrained_one() {
    let mut tree = small_tree(6);
    for i in 0..30 {
        tree.add(Point::from((f64::from(i % 6), f64::from(i / 6))));
    }

    let center = Point::from((2.9, 2.1));
    let range = 2.5;
    let limit = 7;

    let unconstrained: Vec<_> = tree.get_nearest_unbounded(center.clone()).iter().collect();
    let expected: Vec<_> = unconstrained
        .iter()
        .filter(|item| item.distance <= range)
        .take(limit)
        .cloned()
        .collect();

    let constrained: Vec<_> = tree.get_nearest(center, range, limit).iter().collect();
    assert_eq!(constrained.len(), expected.len());
    for (got, want) in constrained.iter().zip(&expected) {
        assert_relative_eq!(got.distance, want.distance, epsilon = 1e-9);
    }
}

#[test]
fn test_query_on_empty_tree_terminates_immediately() {
    let tree = small_tree(7);
    assert_eq!(tree.get_nearest_unbounded(Point::from((1.0, 1.0))).iter().count(), 0);
    assert_eq!(tree.get_nearest(Point::from((1.0, 1.0)), 10.0, 10).iter().count(), 0);
}

#[test]
fn test_query_iterator_is_lazy_and_restartable() {
    let mut tree = small_tree(8);
    for i in 0..12 {
        tree.add(Point::from((f64::from(i), 0.0)));
    }

    let query = tree.get_nearest_by_limit(Point::from((0.0, 0.0)), 5);

    // Two independent iterations over the same query agree.
    let first: Vec<_> = query.iter().collect();
    let second: Vec<_> = (&query).into_iter().collect();
    assert_eq!(first.len(), 5);
    assert_eq!(first, second);

    // Pulling a prefix leaves the rest of the traversal undone.
    let mut iter = query.iter();
    assert_eq!(iter.next().unwrap().data, Point::from((0.0, 0.0)));
    assert_eq!(iter.next().unwrap().data, Point::from((1.0, 0.0)));
    drop(iter);
}

#[test]
fn test_limit_larger_than_population() {
    let mut tree = small_tree(9);
    for i in 0..4 {
        tree.add(Point::from((f64::from(i), 0.0)));
    }
    let results: Vec<_> = tree.get_nearest_by_limit(Point::from((0.0, 0.0)), 100).iter().collect();
    assert_eq!(results.len(), 4);
}
