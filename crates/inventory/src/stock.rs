//! Stock changes applied by the transactional executor.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use slotwise_core::{BinId, DomainError, ItemId};

/// A single-bin stock mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockChange {
    /// Put units into the bin, creating the batch if it is not there yet.
    Receive {
        item_id: ItemId,
        batch_number: Option<String>,
        expiry_date: Option<NaiveDate>,
        quantity: u32,
    },
    /// Take units out of an existing batch, deleting it when it reaches zero.
    Issue {
        item_id: ItemId,
        batch_number: Option<String>,
        quantity: u32,
    },
}

impl StockChange {
    pub fn item_id(&self) -> ItemId {
        match self {
            StockChange::Receive { item_id, .. } | StockChange::Issue { item_id, .. } => *item_id,
        }
    }

    pub fn batch_number(&self) -> Option<&str> {
        match self {
            StockChange::Receive { batch_number, .. } | StockChange::Issue { batch_number, .. } => {
                batch_number.as_deref()
            }
        }
    }

    pub fn quantity(&self) -> u32 {
        match self {
            StockChange::Receive { quantity, .. } | StockChange::Issue { quantity, .. } => *quantity,
        }
    }
}

/// State of the bin and batch right after a change was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub bin_id: BinId,
    pub version: u64,
    pub current_load: u32,
    /// Quantity left in the touched batch (0 when the batch was deleted).
    pub batch_quantity: u32,
}

/// Why a stock change could not be applied to the current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("bin {0} not found")]
    BinNotFound(BinId),

    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    #[error("bin {bin} changed since it was read (expected version {expected}, found {actual})")]
    StaleVersion { bin: String, expected: u64, actual: u64 },

    #[error("bin {bin} is {status}")]
    BinUnavailable { bin: String, status: &'static str },

    #[error("bin {bin} cannot take {requested} units ({available} free)")]
    InsufficientCapacity {
        bin: String,
        requested: u32,
        available: u32,
    },

    #[error("bin {bin} holds {available} units of the batch, {requested} requested")]
    InsufficientStock {
        bin: String,
        requested: u32,
        available: u32,
    },

    #[error("quantity must be positive")]
    InvalidQuantity,
}

impl From<StockError> for DomainError {
    fn from(value: StockError) -> Self {
        match &value {
            StockError::BinNotFound(_) | StockError::ItemNotFound(_) => {
                DomainError::not_found(value.to_string())
            }
            StockError::StaleVersion { .. } | StockError::BinUnavailable { .. } => {
                DomainError::conflict(value.to_string())
            }
            StockError::InsufficientCapacity { .. } | StockError::InsufficientStock { .. } => {
                DomainError::invariant(value.to_string())
            }
            StockError::InvalidQuantity => DomainError::validation(value.to_string()),
        }
    }
}
