use serde::{Deserialize, Serialize};

use slotwise_core::{DomainError, DomainResult, ItemId, Priority};

/// One requested item and quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickLine {
    pub item_id: ItemId,
    pub quantity: u32,
    #[serde(default)]
    pub priority: Priority,
}

impl PickLine {
    pub fn new(item_id: ItemId, quantity: u32, priority: Priority) -> Self {
        Self {
            item_id,
            quantity,
            priority,
        }
    }
}

/// Carrier and schedule limits applied to every route of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PickingConstraints {
    /// Maximum load per trip in kilograms.
    pub max_weight: Option<f64>,
    /// Maximum load per trip in cubic metres.
    pub max_volume: Option<f64>,
    /// Seconds available for the whole plan. Trips run back to back from
    /// the depot, so a later trip starts when the previous one has returned.
    pub time_window_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickingRequest {
    pub lines: Vec<PickLine>,
    #[serde(default)]
    pub constraints: PickingConstraints,
}

impl PickingRequest {
    pub fn new(lines: Vec<PickLine>) -> Self {
        Self {
            lines,
            constraints: PickingConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: PickingConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("pick list cannot be empty"));
        }
        if let Some(i) = self.lines.iter().position(|l| l.quantity == 0) {
            return Err(DomainError::validation(format!(
                "pick line {i} has zero quantity"
            )));
        }
        let c = &self.constraints;
        for (name, limit) in [
            ("max_weight", c.max_weight),
            ("max_volume", c.max_volume),
            ("time_window_secs", c.time_window_secs),
        ] {
            if let Some(v) = limit {
                if !(v.is_finite() && v > 0.0) {
                    return Err(DomainError::validation(format!(
                        "{name} must be a finite positive number"
                    )));
                }
            }
        }
        Ok(())
    }
}
