//! Visit ordering: nearest neighbour from the depot, improved by 2-opt.
//!
//! Routes are open paths: they start at the depot and end at the last stop.

use crate::distance::{path_length, DistanceMetric, Point};

const MAX_TWO_OPT_PASSES: usize = 100;
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    /// Indices into the stop list, in visiting order.
    pub order: Vec<usize>,
    pub length: f64,
    /// Expedited stops were moved to the front.
    pub priority_first: bool,
}

/// Greedy tour over `subset`, starting at `start`. Ties go to the lower index.
pub fn nearest_neighbour(
    metric: DistanceMetric,
    start: Point,
    points: &[Point],
    subset: &[usize],
) -> Vec<usize> {
    let mut left: Vec<usize> = subset.to_vec();
    left.sort_unstable();
    let mut order = Vec::with_capacity(left.len());
    let mut here = start;
    while !left.is_empty() {
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (k, &i) in left.iter().enumerate() {
            let d = metric.between(here, points[i]);
            if d < best_d {
                best = k;
                best_d = d;
            }
        }
        let i = left.remove(best);
        here = points[i];
        order.push(i);
    }
    order
}

/// Reverse segments while doing so shortens the open path from `start`.
pub fn two_opt(metric: DistanceMetric, start: Point, points: &[Point], mut order: Vec<usize>) -> Vec<usize> {
    let n = order.len();
    if n < 2 {
        return order;
    }
    let at = |order: &[usize], k: usize| points[order[k]];

    for _ in 0..MAX_TWO_OPT_PASSES {
        let mut improved = false;
        for i in 0..n - 1 {
            for j in i + 1..n {
                let a = if i == 0 { start } else { at(&order, i - 1) };
                let b = at(&order, i);
                let c = at(&order, j);
                let mut delta = metric.between(a, c) - metric.between(a, b);
                if j + 1 < n {
                    let d = at(&order, j + 1);
                    delta += metric.between(b, d) - metric.between(c, d);
                }
                if delta < -EPSILON {
                    order[i..=j].reverse();
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }
    order
}

fn tour(metric: DistanceMetric, start: Point, points: &[Point], subset: &[usize]) -> Vec<usize> {
    two_opt(metric, start, points, nearest_neighbour(metric, start, points, subset))
}

/// Order all stops, preferring expedited ones first when the detour stays
/// within `tolerance` of the unconstrained length.
pub fn sequence_stops(
    metric: DistanceMetric,
    depot: Point,
    points: &[Point],
    expedited: &[bool],
    tolerance: f64,
) -> Sequence {
    let all: Vec<usize> = (0..points.len()).collect();
    let order = tour(metric, depot, points, &all);
    let length = path_length(metric, depot, points, &order);

    let (urgent, rest): (Vec<usize>, Vec<usize>) = all.iter().partition(|&&i| expedited[i]);
    if urgent.is_empty() || rest.is_empty() {
        return Sequence {
            order,
            length,
            priority_first: false,
        };
    }

    let mut first = tour(metric, depot, points, &urgent);
    let handover = first.last().map(|&i| points[i]).unwrap_or(depot);
    first.extend(tour(metric, handover, points, &rest));
    let first_length = path_length(metric, depot, points, &first);

    if first_length <= length * (1.0 + tolerance) + EPSILON {
        Sequence {
            order: first,
            length: first_length,
            priority_first: true,
        }
    } else {
        Sequence {
            order,
            length,
            priority_first: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn line(ys: &[f64]) -> Vec<Point> {
        ys.iter().map(|&y| Point::new(0.0, y)).collect()
    }

    #[test]
    fn nearest_neighbour_walks_outward() {
        let points = line(&[5.0, 1.0, 3.0]);
        let order = nearest_neighbour(DistanceMetric::Grid, Point::ORIGIN, &points, &[0, 1, 2]);
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn two_opt_removes_a_crossing() {
        // Square corners visited in crossing order.
        let points = vec![
            Point::new(0.0, 1.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 2.0),
        ];
        let metric = DistanceMetric::Euclidean;
        let crossing = vec![0, 1, 3, 2];
        let before = path_length(metric, Point::ORIGIN, &points, &crossing);
        let improved = two_opt(metric, Point::ORIGIN, &points, crossing);
        let after = path_length(metric, Point::ORIGIN, &points, &improved);
        assert!(after < before);
    }

    #[test]
    fn expedited_stop_goes_first_within_tolerance() {
        // Low stop at y=1, urgent at y=1.1: detour is tiny.
        let points = line(&[1.0, 1.1]);
        let seq = sequence_stops(DistanceMetric::Grid, Point::ORIGIN, &points, &[false, true], 0.15);
        assert!(seq.priority_first);
        assert_eq!(seq.order, vec![1, 0]);
        assert!((seq.length - 1.2).abs() < 1e-9);
    }

    #[test]
    fn expedited_stop_waits_when_detour_is_too_long() {
        let points = line(&[1.0, 10.0]);
        let seq = sequence_stops(DistanceMetric::Grid, Point::ORIGIN, &points, &[false, true], 0.15);
        assert!(!seq.priority_first);
        assert_eq!(seq.order, vec![0, 1]);
        assert_eq!(seq.length, 10.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn sequence_visits_every_stop_once(
            coords in proptest::collection::vec((0.0f64..50.0, 0.0f64..50.0, any::<bool>()), 0..12)
        ) {
            let points: Vec<Point> = coords.iter().map(|&(x, y, _)| Point::new(x, y)).collect();
            let expedited: Vec<bool> = coords.iter().map(|&(_, _, e)| e).collect();
            let seq = sequence_stops(DistanceMetric::Euclidean, Point::ORIGIN, &points, &expedited, 0.15);

            let mut seen = seq.order.clone();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..points.len()).collect::<Vec<_>>());
            let recomputed = path_length(DistanceMetric::Euclidean, Point::ORIGIN, &points, &seq.order);
            prop_assert!((recomputed - seq.length).abs() < 1e-6);
        }

        #[test]
        fn two_opt_never_lengthens(
            coords in proptest::collection::vec((0.0f64..50.0, 0.0f64..50.0), 0..10)
        ) {
            let points: Vec<Point> = coords.iter().map(|&(x, y)| Point::new(x, y)).collect();
            let order: Vec<usize> = (0..points.len()).collect();
            let metric = DistanceMetric::Grid;
            let before = path_length(metric, Point::ORIGIN, &points, &order);
            let after = path_length(metric, Point::ORIGIN, &points, &two_opt(metric, Point::ORIGIN, &points, order.clone()));
            prop_assert!(after <= before + 1e-9);
        }
    }
}
