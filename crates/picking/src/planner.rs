use std::cmp::Reverse;
use std::collections::BTreeMap;

use tracing::debug;

use slotwise_core::{DomainError, DomainResult, ItemId, Priority};
use slotwise_inventory::{BinIdx, StorageTopology};

use crate::allocation::{allocate_line, Reservations};
use crate::distance::{bin_position, spanning_tree_length, Point};
use crate::plan::{PickingPlan, PickingRoute, RouteStop, ShortfallReason, UnsatisfiedLine};
use crate::policy::RoutingPolicy;
use crate::request::{PickingConstraints, PickingRequest};
use crate::sequence::sequence_stops;

/// A planned draw from one batch, before routing.
#[derive(Debug, Clone)]
struct Pick {
    line: usize,
    bin: BinIdx,
    bin_version: u64,
    item_id: ItemId,
    batch_number: Option<String>,
    quantity: u32,
    priority: Priority,
    unit_weight: f64,
    unit_volume: f64,
    position: Point,
}

/// Builds picking routes over a topology snapshot.
///
/// Model:
/// - Lines are served in priority order (stable), each drawing stock
///   FIFO-first, then nearest to the previous allocation.
/// - All picks are sequenced together, then cut into trips wherever the
///   carrier's weight or volume limit would be exceeded.
/// - Each trip is re-sequenced and timed; stops that end past the time
///   window are dropped.
///
/// Lines that cannot be fully served are reported, never failed.
#[derive(Debug, Clone, Default)]
pub struct RoutePlanner {
    policy: RoutingPolicy,
}

impl RoutePlanner {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn plan(
        &self,
        topology: &StorageTopology,
        request: &PickingRequest,
    ) -> DomainResult<PickingPlan> {
        request.validate()?;
        self.policy.validate()?;
        let constraints = &request.constraints;

        let items = request
            .lines
            .iter()
            .map(|line| {
                topology
                    .item(line.item_id)
                    .ok_or_else(|| DomainError::not_found(format!("item {}", line.item_id)))
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let mut order: Vec<usize> = (0..request.lines.len()).collect();
        order.sort_by_key(|&i| Reverse(request.lines[i].priority));

        let mut shortfalls: BTreeMap<usize, ShortfallReason> = BTreeMap::new();
        let mut reservations = Reservations::default();
        let mut picks = Vec::new();
        let mut anchor = self.policy.depot;
        let position = |bin: BinIdx| bin_position(topology, bin, &self.policy);

        for i in order {
            let line = &request.lines[i];
            let item = items[i];
            let unit_volume = item.unit_volume.unwrap_or(0.0);
            if exceeds(constraints.max_weight, item.unit_weight)
                || exceeds(constraints.max_volume, unit_volume)
            {
                shortfalls.insert(i, ShortfallReason::ExceedsCarrierLimit);
                continue;
            }

            let allocated = allocate_line(
                topology,
                line.item_id,
                line.quantity,
                anchor,
                self.policy.metric,
                &mut reservations,
                position,
            );
            if allocated.shortfall > 0 {
                shortfalls.insert(i, ShortfallReason::InsufficientStock);
            }
            if let Some(last) = allocated.allocations.last() {
                anchor = last.position;
            }
            picks.extend(allocated.allocations.into_iter().map(|a| Pick {
                line: i,
                bin: a.bin,
                bin_version: a.bin_version,
                item_id: line.item_id,
                batch_number: a.batch_number,
                quantity: a.quantity,
                priority: line.priority,
                unit_weight: item.unit_weight,
                unit_volume,
                position: a.position,
            }));
        }

        let trips = self.split_trips(picks, constraints);
        debug!(trips = trips.len(), "pick list split into trips");

        // Trips run back to back: each starts once the picker is back at the
        // depot, and the time window covers the whole plan.
        let mut plan = PickingPlan::default();
        let mut clock = 0.0;
        for trip in trips {
            let built = self.build_route(
                topology,
                trip,
                plan.routes.len() + 1,
                clock,
                constraints,
                &mut shortfalls,
            );
            if let Some((route, back_at_depot)) = built {
                clock = back_at_depot;
                plan.routes.push(route);
            }
        }

        for (i, line) in request.lines.iter().enumerate() {
            let planned = plan.planned_for(i);
            if planned < line.quantity {
                plan.unsatisfied_lines.push(UnsatisfiedLine {
                    line: i,
                    item_id: line.item_id,
                    requested: line.quantity,
                    planned,
                    reason: shortfalls
                        .get(&i)
                        .copied()
                        .unwrap_or(ShortfallReason::InsufficientStock),
                });
            }
        }

        debug!(
            routes = plan.routes.len(),
            stops = plan.stop_count(),
            distance = plan.total_distance(),
            unsatisfied = plan.unsatisfied_lines.len(),
            "picking plan built"
        );
        Ok(plan)
    }

    /// Walk the globally sequenced picks, opening a new trip whenever the
    /// carrier is full. A pick that only partly fits is split.
    fn split_trips(&self, picks: Vec<Pick>, constraints: &PickingConstraints) -> Vec<Vec<Pick>> {
        let points: Vec<Point> = picks.iter().map(|p| p.position).collect();
        let expedited: Vec<bool> = picks.iter().map(|p| p.priority.is_expedited()).collect();
        let sequence = sequence_stops(
            self.policy.metric,
            self.policy.depot,
            &points,
            &expedited,
            self.policy.priority_tolerance,
        );

        let mut trips: Vec<Vec<Pick>> = Vec::new();
        let mut current: Vec<Pick> = Vec::new();
        let (mut weight, mut volume) = (0.0, 0.0);

        for i in sequence.order {
            let pick = &picks[i];
            let mut left = pick.quantity;
            while left > 0 {
                let room = units_that_fit(constraints.max_weight, weight, pick.unit_weight)
                    .min(units_that_fit(constraints.max_volume, volume, pick.unit_volume));
                let take = room.min(left);
                if take == 0 {
                    if current.is_empty() {
                        // A single unit never fits; checked before allocation.
                        break;
                    }
                    trips.push(std::mem::take(&mut current));
                    weight = 0.0;
                    volume = 0.0;
                    continue;
                }
                let mut part = pick.clone();
                part.quantity = take;
                weight += pick.unit_weight * f64::from(take);
                volume += pick.unit_volume * f64::from(take);
                current.push(part);
                left -= take;
            }
        }
        if !current.is_empty() {
            trips.push(current);
        }
        trips
    }

    fn build_route(
        &self,
        topology: &StorageTopology,
        trip: Vec<Pick>,
        number: usize,
        start: f64,
        constraints: &PickingConstraints,
        shortfalls: &mut BTreeMap<usize, ShortfallReason>,
    ) -> Option<(PickingRoute, f64)> {
        let policy = &self.policy;
        let metric = policy.metric;
        let points: Vec<Point> = trip.iter().map(|p| p.position).collect();
        let expedited: Vec<bool> = trip.iter().map(|p| p.priority.is_expedited()).collect();
        let sequence = sequence_stops(
            metric,
            policy.depot,
            &points,
            &expedited,
            policy.priority_tolerance,
        );

        let mut stops = Vec::with_capacity(trip.len());
        let mut kept_points = Vec::with_capacity(trip.len());
        let mut here = policy.depot;
        let (mut distance, mut seconds) = (0.0, 0.0);
        let (mut weight, mut volume) = (0.0, 0.0);

        for i in sequence.order {
            let pick = &trip[i];
            let leg = metric.between(here, pick.position);
            let level = topology.rack_of(pick.bin).level;
            let handling = policy.seconds_per_stop
                + policy.seconds_per_unit * f64::from(pick.quantity)
                + policy.seconds_per_level * f64::from(level);
            let arrival = seconds + leg / policy.travel_speed + handling;

            if constraints
                .time_window_secs
                .is_some_and(|window| start + arrival > window)
            {
                shortfalls.entry(pick.line).or_insert(ShortfallReason::TimeWindow);
                continue;
            }

            here = pick.position;
            distance += leg;
            seconds = arrival;
            weight += pick.unit_weight * f64::from(pick.quantity);
            volume += pick.unit_volume * f64::from(pick.quantity);
            kept_points.push(pick.position);

            let bin = topology.bin(pick.bin);
            stops.push(RouteStop {
                line: pick.line,
                bin_id: bin.id,
                bin_code: bin.code.clone(),
                location_path: topology.location_path(pick.bin),
                bin_version: pick.bin_version,
                item_id: pick.item_id,
                batch_number: pick.batch_number.clone(),
                quantity: pick.quantity,
                priority: pick.priority,
                leg_distance: leg,
                cumulative_distance: distance,
                cumulative_seconds: seconds,
            });
        }

        if stops.is_empty() {
            return None;
        }

        let minimum = spanning_tree_length(metric, policy.depot, &kept_points);
        let efficiency = if distance > 0.0 {
            (minimum / distance).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let back_at_depot =
            start + seconds + metric.between(here, policy.depot) / policy.travel_speed;
        let route = PickingRoute {
            trip: number,
            stops,
            total_distance: distance,
            estimated_seconds: seconds,
            theoretical_min_distance: minimum,
            efficiency,
            total_weight: weight,
            total_volume: volume,
            priority_first: sequence.priority_first,
        };
        Some((route, back_at_depot))
    }
}

fn exceeds(limit: Option<f64>, per_unit: f64) -> bool {
    limit.is_some_and(|limit| per_unit > limit)
}

fn units_that_fit(limit: Option<f64>, used: f64, per_unit: f64) -> u32 {
    match limit {
        Some(limit) if per_unit > 0.0 => {
            let units = ((limit - used) / per_unit + 1e-9).floor();
            if units <= 0.0 {
                0
            } else if units >= f64::from(u32::MAX) {
                u32::MAX
            } else {
                units as u32
            }
        }
        _ => u32::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use slotwise_core::{BinId, TemperatureClass};
    use slotwise_inventory::{Aisle, Bin, BinItem, Item, Rack, Zone};

    use crate::distance::DistanceMetric;
    use crate::request::PickLine;

    struct Warehouse {
        topology: StorageTopology,
        item: ItemId,
        bins: Vec<BinId>,
    }

    /// One aisle, bins one metre apart along it, each holding `stock[n]`
    /// units of a 2 kg item.
    fn warehouse(stock: &[u32]) -> Warehouse {
        let mut b = StorageTopology::builder();
        let zone = b.zone(Zone::new("A", TemperatureClass::Ambient));
        let aisle = b
            .aisle(Aisle {
                zone,
                code: "A1".into(),
                position: 0,
                width: 3.0,
            })
            .unwrap();
        let item = Item::new(ItemId::new(), "X-001", "dry", TemperatureClass::Ambient)
            .with_unit_weight(2.0)
            .with_unit_volume(0.01);
        b.item(item.clone()).unwrap();
        let mut bins = Vec::new();
        for (n, &qty) in stock.iter().enumerate() {
            let rack = b
                .rack(Rack {
                    aisle,
                    code: format!("R{n}"),
                    level: 0,
                    row: 0,
                    column: n as u32 + 1,
                })
                .unwrap();
            let id = BinId::new();
            b.bin(Bin::new(id, format!("B{n}"), rack, 100)).unwrap();
            if qty > 0 {
                b.batch(BinItem::new(id, item.id, qty)).unwrap();
            }
            bins.push(id);
        }
        Warehouse {
            topology: b.build().unwrap(),
            item: item.id,
            bins,
        }
    }

    fn grid_planner() -> RoutePlanner {
        RoutePlanner::new(
            RoutingPolicy::default().with_metric(DistanceMetric::Grid),
        )
    }

    #[test]
    fn single_bin_yields_single_stop_route() {
        let w = warehouse(&[40]);
        let request = PickingRequest::new(vec![PickLine::new(w.item, 25, Priority::Medium)]);
        let plan = grid_planner().plan(&w.topology, &request).unwrap();

        assert!(plan.is_fully_satisfied());
        assert_eq!(plan.routes.len(), 1);
        let route = &plan.routes[0];
        assert_eq!(route.stops.len(), 1);
        assert_eq!(route.stops[0].bin_id, w.bins[0]);
        assert_eq!(route.stops[0].quantity, 25);
        assert_eq!(route.stops[0].cumulative_distance, 1.0);
        assert_eq!(route.efficiency, 1.0);
        assert!(route.estimated_seconds > 0.0);
    }

    #[test]
    fn insufficient_stock_is_reported_per_line() {
        let w = warehouse(&[10]);
        let request = PickingRequest::new(vec![PickLine::new(w.item, 15, Priority::Medium)]);
        let plan = grid_planner().plan(&w.topology, &request).unwrap();

        assert_eq!(plan.stop_count(), 1);
        assert_eq!(plan.unsatisfied_lines.len(), 1);
        let short = &plan.unsatisfied_lines[0];
        assert_eq!(short.planned, 10);
        assert_eq!(short.missing(), 5);
        assert_eq!(short.reason, ShortfallReason::InsufficientStock);
    }

    #[test]
    fn unknown_item_is_not_found() {
        let w = warehouse(&[10]);
        let request = PickingRequest::new(vec![PickLine::new(ItemId::new(), 1, Priority::Low)]);
        let err = grid_planner().plan(&w.topology, &request).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn urgent_line_claims_stock_before_earlier_low_line() {
        let w = warehouse(&[10]);
        let request = PickingRequest::new(vec![
            PickLine::new(w.item, 10, Priority::Low),
            PickLine::new(w.item, 10, Priority::Urgent),
        ]);
        let plan = grid_planner().plan(&w.topology, &request).unwrap();
        assert_eq!(plan.planned_for(1), 10);
        assert_eq!(plan.planned_for(0), 0);
        assert_eq!(plan.unsatisfied_lines[0].line, 0);
    }

    #[test]
    fn weight_limit_splits_into_trips() {
        let w = warehouse(&[12]);
        let request = PickingRequest::new(vec![PickLine::new(w.item, 12, Priority::Medium)])
            .with_constraints(PickingConstraints {
                max_weight: Some(10.0),
                ..PickingConstraints::default()
            });
        let plan = grid_planner().plan(&w.topology, &request).unwrap();

        let per_trip: Vec<u32> = plan.routes.iter().map(|r| r.stops[0].quantity).collect();
        assert_eq!(per_trip, vec![5, 5, 2]);
        assert!(plan.routes.iter().all(|r| r.total_weight <= 10.0));
        assert!(plan.is_fully_satisfied());
    }

    #[test]
    fn unit_heavier_than_carrier_is_unsatisfiable() {
        let w = warehouse(&[12]);
        let request = PickingRequest::new(vec![PickLine::new(w.item, 1, Priority::Medium)])
            .with_constraints(PickingConstraints {
                max_weight: Some(1.5),
                ..PickingConstraints::default()
            });
        let plan = grid_planner().plan(&w.topology, &request).unwrap();
        assert!(plan.routes.is_empty());
        assert_eq!(
            plan.unsatisfied_lines[0].reason,
            ShortfallReason::ExceedsCarrierLimit
        );
    }

    #[test]
    fn stops_past_the_time_window_are_dropped() {
        // Stock at columns 1 and 2: 5 units each.
        let w = warehouse(&[5, 5]);
        let planner = RoutePlanner::new(
            RoutingPolicy::default()
                .with_metric(DistanceMetric::Grid)
                .with_travel_speed(1.0)
                .with_handling(0.0, 1.0),
        );
        // First stop: 1 m + 5 units = 6 s; second: +1 m + 3 units = 10 s.
        let request = PickingRequest::new(vec![PickLine::new(w.item, 8, Priority::Medium)])
            .with_constraints(PickingConstraints {
                time_window_secs: Some(8.0),
                ..PickingConstraints::default()
            });
        let plan = planner.plan(&w.topology, &request).unwrap();

        assert_eq!(plan.stop_count(), 1);
        assert_eq!(plan.routes[0].estimated_seconds, 6.0);
        let short = &plan.unsatisfied_lines[0];
        assert_eq!(short.planned, 5);
        assert_eq!(short.reason, ShortfallReason::TimeWindow);
    }

    #[test]
    fn time_window_spans_every_trip() {
        let w = warehouse(&[12]);
        let planner = RoutePlanner::new(
            RoutingPolicy::default()
                .with_metric(DistanceMetric::Grid)
                .with_travel_speed(1.0)
                .with_handling(0.0, 1.0),
        );
        // Trips of 5, 5 and 2 units. Each is 1 m out, the picking time, 1 m back:
        // trip 1 ends its pick at 6 s, trip 2 at 7 + 6 = 13 s, trip 3 at 14 + 3 = 17 s.
        let request = PickingRequest::new(vec![PickLine::new(w.item, 12, Priority::Medium)])
            .with_constraints(PickingConstraints {
                max_weight: Some(10.0),
                time_window_secs: Some(14.0),
                ..PickingConstraints::default()
            });
        let plan = planner.plan(&w.topology, &request).unwrap();

        assert_eq!(plan.routes.len(), 2);
        assert_eq!(plan.routes[1].trip, 2);
        // Route timings stay local to the trip.
        assert_eq!(plan.routes[1].estimated_seconds, 6.0);
        let short = &plan.unsatisfied_lines[0];
        assert_eq!(short.planned, 10);
        assert_eq!(short.reason, ShortfallReason::TimeWindow);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn routes_are_well_formed(
            stock in proptest::collection::vec(0u32..30, 1..8),
            wanted in proptest::collection::vec((1u32..40, 0usize..4), 1..5),
            max_weight in proptest::option::of(4.0f64..50.0),
        ) {
            let priorities = [Priority::Low, Priority::Medium, Priority::High, Priority::Urgent];
            let w = warehouse(&stock);
            let lines = wanted
                .iter()
                .map(|&(q, p)| PickLine::new(w.item, q, priorities[p]))
                .collect();
            let request = PickingRequest::new(lines).with_constraints(PickingConstraints {
                max_weight,
                ..PickingConstraints::default()
            });
            let plan = RoutePlanner::default().plan(&w.topology, &request).unwrap();

            let total_stock: u32 = stock.iter().sum();
            let planned: u32 = (0..wanted.len()).map(|i| plan.planned_for(i)).sum();
            prop_assert!(planned <= total_stock);
            for (i, &(q, _)) in wanted.iter().enumerate() {
                prop_assert!(plan.planned_for(i) <= q);
            }
            for route in &plan.routes {
                prop_assert!(route.efficiency > 0.0 && route.efficiency <= 1.0);
                prop_assert!(route.theoretical_min_distance <= route.total_distance + 1e-9);
                if let Some(limit) = max_weight {
                    prop_assert!(route.total_weight <= limit + 1e-9);
                }
                let mut last = 0.0;
                for stop in &route.stops {
                    prop_assert!(stop.cumulative_distance + 1e-9 >= last);
                    last = stop.cumulative_distance;
                }
            }
        }
    }
}
