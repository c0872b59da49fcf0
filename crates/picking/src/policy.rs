use serde::{Deserialize, Serialize};

use slotwise_core::{DomainError, DomainResult};

use crate::distance::{DistanceMetric, Point};

/// Travel and handling model used to sequence and time pick routes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    pub metric: DistanceMetric,
    /// Extra route length accepted to visit URGENT/HIGH stops first,
    /// as a fraction of the unconstrained length.
    pub priority_tolerance: f64,
    /// Walking speed in metres per second.
    pub travel_speed: f64,
    /// Reach time per rack level above the floor.
    pub seconds_per_level: f64,
    pub seconds_per_unit: f64,
    /// Fixed handling time per stop.
    pub seconds_per_stop: f64,
    /// Where every route starts.
    pub depot: Point,
    /// Distance between adjacent rack columns along an aisle.
    pub bay_width: f64,
    /// Depth of the rack row separating neighbouring aisles.
    pub rack_depth: f64,
}

impl RoutingPolicy {
    pub const DEFAULT_PRIORITY_TOLERANCE: f64 = 0.15;
    pub const DEFAULT_TRAVEL_SPEED: f64 = 1.2;
    pub const DEFAULT_SECONDS_PER_LEVEL: f64 = 4.0;
    pub const DEFAULT_SECONDS_PER_UNIT: f64 = 3.0;
    pub const DEFAULT_SECONDS_PER_STOP: f64 = 10.0;
    pub const DEFAULT_BAY_WIDTH: f64 = 1.0;
    pub const DEFAULT_RACK_DEPTH: f64 = 1.0;

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_priority_tolerance(mut self, tolerance: f64) -> Self {
        self.priority_tolerance = tolerance;
        self
    }

    pub fn with_travel_speed(mut self, speed: f64) -> Self {
        self.travel_speed = speed;
        self
    }

    pub fn with_depot(mut self, depot: Point) -> Self {
        self.depot = depot;
        self
    }

    pub fn with_handling(mut self, seconds_per_stop: f64, seconds_per_unit: f64) -> Self {
        self.seconds_per_stop = seconds_per_stop;
        self.seconds_per_unit = seconds_per_unit;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if !(self.travel_speed.is_finite() && self.travel_speed > 0.0) {
            return Err(DomainError::validation("travel_speed must be positive"));
        }
        if !(self.priority_tolerance.is_finite() && self.priority_tolerance >= 0.0) {
            return Err(DomainError::validation(
                "priority_tolerance must be non-negative",
            ));
        }
        for (name, v) in [
            ("seconds_per_level", self.seconds_per_level),
            ("seconds_per_unit", self.seconds_per_unit),
            ("seconds_per_stop", self.seconds_per_stop),
            ("bay_width", self.bay_width),
            ("rack_depth", self.rack_depth),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(DomainError::validation(format!(
                    "{name} must be a finite non-negative number"
                )));
            }
        }
        if !(self.depot.x.is_finite() && self.depot.y.is_finite()) {
            return Err(DomainError::validation("depot must have finite coordinates"));
        }
        Ok(())
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::default(),
            priority_tolerance: Self::DEFAULT_PRIORITY_TOLERANCE,
            travel_speed: Self::DEFAULT_TRAVEL_SPEED,
            seconds_per_level: Self::DEFAULT_SECONDS_PER_LEVEL,
            seconds_per_unit: Self::DEFAULT_SECONDS_PER_UNIT,
            seconds_per_stop: Self::DEFAULT_SECONDS_PER_STOP,
            depot: Point::ORIGIN,
            bay_width: Self::DEFAULT_BAY_WIDTH,
            rack_depth: Self::DEFAULT_RACK_DEPTH,
        }
    }
}
