use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use slotwise_core::{BinId, ExpectedVersion, MovementId};
use slotwise_inventory::{
    AppliedChange, BinStatus, Movement, MovementStatus, StockChange, StockError, StorageTopology,
};

/// The ledger half of a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    /// Append a new movement (e.g. a putaway recorded directly as COMPLETED).
    Append(Movement),
    /// Move an existing movement along its state machine.
    Transition {
        movement_id: MovementId,
        to: MovementStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
}

/// One bin's stock change plus the ledger write that records it.
///
/// A store applies both or neither. `expected_version` is checked against the
/// bin's version immediately before mutating.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOfWork {
    pub bin_id: BinId,
    pub expected_version: ExpectedVersion,
    pub change: StockChange,
    pub ledger: LedgerWrite,
}

/// Result of a committed unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub applied: AppliedChange,
    /// The movement as stored after the ledger write.
    pub movement: Movement,
    /// Ledger position of the movement.
    pub sequence: u64,
}

/// A movement together with its ledger position.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub movement: Movement,
}

/// Inventory store operation error.
///
/// Business rejections detected at commit time (stale version, capacity or
/// stock no longer available) are distinct from backend faults so callers
/// can tell "retry the decision" from "retry later / alert".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("invalid movement transition: {0}")]
    InvalidTransition(String),

    #[error("transaction timed out: {0}")]
    Timeout(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<StockError> for StoreError {
    fn from(value: StockError) -> Self {
        let msg = value.to_string();
        match value {
            StockError::BinNotFound(_) | StockError::ItemNotFound(_) => StoreError::NotFound(msg),
            StockError::StaleVersion { .. } | StockError::BinUnavailable { .. } => {
                StoreError::Concurrency(msg)
            }
            StockError::InsufficientCapacity { .. } => StoreError::InsufficientCapacity(msg),
            StockError::InsufficientStock { .. } => StoreError::InsufficientStock(msg),
            StockError::InvalidQuantity => StoreError::Backend(msg),
        }
    }
}

/// Persistence boundary of the engine.
///
/// ## Guarantees
///
/// - `snapshot` reflects committed state at call time (read-committed or
///   stronger).
/// - `commit` is atomic: the bin load, the batch record and the ledger write
///   are applied together or not at all.
/// - `commit` re-validates version, capacity and stock against the latest
///   state; it never silently overwrites a concurrent change.
/// - The ledger is append-only; entries change only through valid status
///   transitions.
pub trait InventoryStore: Send + Sync {
    /// Read the full topology with current loads and batches.
    fn snapshot(&self) -> Result<StorageTopology, StoreError>;

    /// Apply one unit of work atomically.
    fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, StoreError>;

    /// Append ledger entries that carry no stock change yet (PENDING picks,
    /// FAILED attempts). All or nothing.
    fn append_movements(&self, movements: Vec<Movement>) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Transition a movement without touching stock.
    fn transition_movement(
        &self,
        movement_id: MovementId,
        to: MovementStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError>;

    /// Whole ledger in append order.
    fn movements(&self) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Ledger entries whose source or destination is `bin_id`.
    fn movements_for_bin(&self, bin_id: BinId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Change a bin's operational status. Returns the new bin version.
    fn set_bin_status(&self, bin_id: BinId, status: BinStatus) -> Result<u64, StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn snapshot(&self) -> Result<StorageTopology, StoreError> {
        (**self).snapshot()
    }

    fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, StoreError> {
        (**self).commit(work)
    }

    fn append_movements(&self, movements: Vec<Movement>) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).append_movements(movements)
    }

    fn transition_movement(
        &self,
        movement_id: MovementId,
        to: MovementStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        (**self).transition_movement(movement_id, to, reason, at)
    }

    fn movements(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).movements()
    }

    fn movements_for_bin(&self, bin_id: BinId) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).movements_for_bin(bin_id)
    }

    fn set_bin_status(&self, bin_id: BinId, status: BinStatus) -> Result<u64, StoreError> {
        (**self).set_bin_status(bin_id, status)
    }
}

/// Apply a status transition to a copy of `movement`.
pub(crate) fn transitioned(
    movement: &Movement,
    to: MovementStatus,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> Result<Movement, StoreError> {
    let mut next = movement.clone();
    let result = match (to, reason) {
        (MovementStatus::Failed, Some(reason)) => next.fail(reason, at),
        (to, _) => next.transition(to, at),
    };
    result.map_err(|e| {
        StoreError::InvalidTransition(format!(
            "movement {} {} -> {}: {e}",
            movement.id,
            movement.status().as_str(),
            to.as_str()
        ))
    })?;
    Ok(next)
}
