use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use slotwise_core::{DomainError, DomainResult, ItemId, Priority};
use slotwise_inventory::PutawayConstraints;

/// Incoming stock that needs a storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutawayRequest {
    pub item_id: ItemId,
    pub quantity: u32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub constraints: PutawayConstraints,
}

impl PutawayRequest {
    pub fn new(item_id: ItemId, quantity: u32) -> Self {
        Self {
            item_id,
            quantity,
            priority: Priority::default(),
            batch_number: None,
            expiry_date: None,
            constraints: PutawayConstraints::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_constraints(mut self, constraints: PutawayConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity == 0 {
            return Err(DomainError::validation("putaway quantity must be positive"));
        }
        if let Some(batch) = &self.batch_number {
            if batch.trim().is_empty() {
                return Err(DomainError::validation("batch number cannot be blank"));
            }
        }
        if let Some(max_weight) = self.constraints.max_weight {
            if !(max_weight.is_finite() && max_weight > 0.0) {
                return Err(DomainError::validation(
                    "max_weight must be a finite positive number",
                ));
            }
        }
        Ok(())
    }
}
