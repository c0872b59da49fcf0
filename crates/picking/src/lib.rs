//! Picking: turn a pick list into ordered routes through the warehouse.

pub mod allocation;
pub mod distance;
pub mod plan;
pub mod planner;
pub mod policy;
pub mod request;
pub mod sequence;

pub use distance::{DistanceMetric, Point};
pub use plan::{PickingPlan, PickingRoute, RouteStop, ShortfallReason, UnsatisfiedLine};
pub use planner::RoutePlanner;
pub use policy::RoutingPolicy;
pub use request::{PickLine, PickingConstraints, PickingRequest};
