//! Bin coordinates and travel distance.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use slotwise_core::DomainError;
use slotwise_inventory::{BinIdx, StorageTopology};

use crate::policy::RoutingPolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Straight line.
    #[default]
    Euclidean,
    /// Manhattan distance along aisles and cross-aisles.
    Grid,
}

impl DistanceMetric {
    pub fn between(self, a: Point, b: Point) -> f64 {
        let dx = (a.x - b.x).abs();
        let dy = (a.y - b.y).abs();
        match self {
            DistanceMetric::Euclidean => dx.hypot(dy),
            DistanceMetric::Grid => dx + dy,
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "grid" | "manhattan" => Ok(DistanceMetric::Grid),
            other => Err(DomainError::validation(format!("unknown distance metric: {other}"))),
        }
    }
}

/// Floor position of a bin.
///
/// Aisles run along `y`: an aisle's index places it on `x` (one aisle width
/// plus one rack depth apart), a rack's column places it along the aisle.
pub fn bin_position(topology: &StorageTopology, bin: BinIdx, policy: &RoutingPolicy) -> Point {
    let zone = topology.zone_of(bin);
    let aisle = topology.aisle_of(bin);
    let rack = topology.rack_of(bin);
    Point {
        x: zone.origin_x + f64::from(aisle.position) * (aisle.width + policy.rack_depth),
        y: zone.origin_y + f64::from(rack.column) * policy.bay_width,
    }
}

/// Length of the open path depot → points[order[0]] → … → points[order[n-1]].
pub fn path_length(metric: DistanceMetric, depot: Point, points: &[Point], order: &[usize]) -> f64 {
    let mut prev = depot;
    let mut total = 0.0;
    for &i in order {
        total += metric.between(prev, points[i]);
        prev = points[i];
    }
    total
}

/// Weight of a minimum spanning tree over the depot and `points` (Prim).
///
/// Every open path from the depot through all points is a spanning tree, so
/// this is a lower bound on any route's length.
pub fn spanning_tree_length(metric: DistanceMetric, depot: Point, points: &[Point]) -> f64 {
    let nodes: Vec<Point> = std::iter::once(depot).chain(points.iter().copied()).collect();
    let n = nodes.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    best[0] = 0.0;
    let mut total = 0.0;

    for _ in 0..n {
        let mut next = None;
        for v in 0..n {
            if !in_tree[v] && next.is_none_or(|u: usize| best[v] < best[u]) {
                next = Some(v);
            }
        }
        let Some(u) = next else { break };
        in_tree[u] = true;
        total += best[u];
        for v in 0..n {
            if !in_tree[v] {
                let d = metric.between(nodes[u], nodes[v]);
                if d < best[v] {
                    best[v] = d;
                }
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(DistanceMetric::Euclidean.between(a, b), 5.0);
        assert_eq!(DistanceMetric::Grid.between(a, b), 7.0);
    }

    #[test]
    fn path_length_starts_at_depot() {
        let points = [Point::new(0.0, 2.0), Point::new(0.0, 5.0)];
        let d = DistanceMetric::Grid;
        assert_eq!(path_length(d, Point::ORIGIN, &points, &[0, 1]), 5.0);
        assert_eq!(path_length(d, Point::ORIGIN, &points, &[1, 0]), 8.0);
        assert_eq!(path_length(d, Point::ORIGIN, &points, &[]), 0.0);
    }

    #[test]
    fn spanning_tree_of_collinear_points_is_the_span() {
        let points = [Point::new(4.0, 0.0), Point::new(1.0, 0.0), Point::new(2.0, 0.0)];
        let mst = spanning_tree_length(DistanceMetric::Euclidean, Point::ORIGIN, &points);
        assert_eq!(mst, 4.0);
        assert_eq!(
            spanning_tree_length(DistanceMetric::Euclidean, Point::ORIGIN, &[]),
            0.0
        );
    }
}
