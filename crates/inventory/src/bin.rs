use core::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use slotwise_core::{BinId, DomainError, Entity, ItemId, Versioned};

use crate::location::RackIdx;

/// Operational status of a bin. Only `Active` bins take part in putaway or picking.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinStatus {
    Active,
    Blocked,
    Maintenance,
}

impl BinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinStatus::Active => "ACTIVE",
            BinStatus::Blocked => "BLOCKED",
            BinStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl FromStr for BinStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(BinStatus::Active),
            "BLOCKED" => Ok(BinStatus::Blocked),
            "MAINTENANCE" => Ok(BinStatus::Maintenance),
            other => Err(DomainError::validation(format!("unknown bin status: {other}"))),
        }
    }
}

/// Smallest addressable storage unit.
///
/// Invariant: `0 <= current_load <= capacity`, and `current_load` equals the
/// sum of the quantities of the batches stored in the bin. Load and version
/// are only changed through `StorageTopology::apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub id: BinId,
    pub code: String,
    pub rack: RackIdx,
    /// Capacity in units.
    pub capacity: u32,
    pub(crate) current_load: u32,
    /// Maximum total weight in kilograms, when the bin is weight-rated.
    pub weight_limit: Option<f64>,
    pub status: BinStatus,
    pub(crate) version: u64,
}

impl Bin {
    pub fn new(id: BinId, code: impl Into<String>, rack: RackIdx, capacity: u32) -> Self {
        Self {
            id,
            code: code.into(),
            rack,
            capacity,
            current_load: 0,
            weight_limit: None,
            status: BinStatus::Active,
            version: 0,
        }
    }

    pub fn with_weight_limit(mut self, weight_limit: f64) -> Self {
        self.weight_limit = Some(weight_limit);
        self
    }

    pub fn with_status(mut self, status: BinStatus) -> Self {
        self.status = status;
        self
    }

    /// Restore the persisted version (rehydration from storage).
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn current_load(&self) -> u32 {
        self.current_load
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.current_load)
    }

    pub fn is_empty(&self) -> bool {
        self.current_load == 0
    }

    pub fn is_active(&self) -> bool {
        self.status == BinStatus::Active
    }
}

impl Entity for Bin {
    type Id = BinId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Versioned for Bin {
    fn version(&self) -> u64 {
        self.version
    }
}

/// Quantity of one item (optionally one batch) physically present in one bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinItem {
    pub bin_id: BinId,
    pub item_id: ItemId,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: u32,
}

impl BinItem {
    pub fn new(bin_id: BinId, item_id: ItemId, quantity: u32) -> Self {
        Self {
            bin_id,
            item_id,
            batch_number: None,
            expiry_date: None,
            quantity,
        }
    }

    pub fn with_batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    /// Same item and same batch number (an absent batch number is its own batch).
    pub fn is_batch(&self, item_id: ItemId, batch_number: Option<&str>) -> bool {
        self.item_id == item_id && self.batch_number.as_deref() == batch_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("blocked".parse::<BinStatus>().unwrap(), BinStatus::Blocked);
        assert_eq!(" ACTIVE ".parse::<BinStatus>().unwrap(), BinStatus::Active);
        assert!("closed".parse::<BinStatus>().is_err());
    }

    #[test]
    fn remaining_capacity_never_underflows() {
        let mut bin = Bin::new(BinId::new(), "B-01", RackIdx(0), 10);
        bin.current_load = 10;
        assert_eq!(bin.remaining_capacity(), 0);
        assert!(!bin.is_empty());
    }

    #[test]
    fn batch_identity_includes_batch_number() {
        let item = ItemId::new();
        let batch = BinItem::new(BinId::new(), item, 5).with_batch("LOT-1");
        assert!(batch.is_batch(item, Some("LOT-1")));
        assert!(!batch.is_batch(item, None));
        assert!(!batch.is_batch(ItemId::new(), Some("LOT-1")));
    }
}
