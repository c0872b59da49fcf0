use serde::{Deserialize, Serialize};

use slotwise_core::{BinId, ItemId, Priority};

/// One visit on a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    /// Index of the originating line in the request.
    pub line: usize,
    pub bin_id: BinId,
    pub bin_code: String,
    pub location_path: String,
    /// Bin version observed when the plan was made.
    pub bin_version: u64,
    pub item_id: ItemId,
    pub batch_number: Option<String>,
    pub quantity: u32,
    pub priority: Priority,
    pub leg_distance: f64,
    pub cumulative_distance: f64,
    pub cumulative_seconds: f64,
}

/// A single trip from the depot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickingRoute {
    pub trip: usize,
    pub stops: Vec<RouteStop>,
    pub total_distance: f64,
    pub estimated_seconds: f64,
    /// Minimum spanning tree over the depot and the stops.
    pub theoretical_min_distance: f64,
    /// `theoretical_min_distance / total_distance`, 1.0 for a zero-length route.
    pub efficiency: f64,
    pub total_weight: f64,
    pub total_volume: f64,
    pub priority_first: bool,
}

impl PickingRoute {
    pub fn bins(&self) -> impl Iterator<Item = BinId> + '_ {
        self.stops.iter().map(|s| s.bin_id)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallReason {
    /// Not enough unreserved stock in active bins.
    InsufficientStock,
    /// A single unit is heavier or bulkier than the carrier allows.
    ExceedsCarrierLimit,
    /// Stops were dropped to keep the route inside the time window.
    TimeWindow,
}

/// A line that could not be fully planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsatisfiedLine {
    pub line: usize,
    pub item_id: ItemId,
    pub requested: u32,
    pub planned: u32,
    pub reason: ShortfallReason,
}

impl UnsatisfiedLine {
    pub fn missing(&self) -> u32 {
        self.requested - self.planned
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PickingPlan {
    pub routes: Vec<PickingRoute>,
    pub unsatisfied_lines: Vec<UnsatisfiedLine>,
}

impl PickingPlan {
    pub fn is_fully_satisfied(&self) -> bool {
        self.unsatisfied_lines.is_empty()
    }

    pub fn stop_count(&self) -> usize {
        self.routes.iter().map(|r| r.stops.len()).sum()
    }

    pub fn total_distance(&self) -> f64 {
        self.routes.iter().map(|r| r.total_distance).sum()
    }

    /// Units planned for request line `line` across all routes.
    pub fn planned_for(&self, line: usize) -> u32 {
        self.routes
            .iter()
            .flat_map(|r| r.stops.iter())
            .filter(|s| s.line == line)
            .map(|s| s.quantity)
            .sum()
    }
}
