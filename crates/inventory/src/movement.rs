use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use slotwise_core::{BinId, DomainError, DomainResult, Entity, ItemId, MovementId, Priority, UserId};
use slotwise_events::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Putaway,
    Picking,
    Transfer,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Putaway => "PUTAWAY",
            MovementType::Picking => "PICKING",
            MovementType::Transfer => "TRANSFER",
            MovementType::Adjustment => "ADJUSTMENT",
        }
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PUTAWAY" => Ok(MovementType::Putaway),
            "PICKING" => Ok(MovementType::Picking),
            "TRANSFER" => Ok(MovementType::Transfer),
            "ADJUSTMENT" => Ok(MovementType::Adjustment),
            other => Err(DomainError::validation(format!("unknown movement type: {other}"))),
        }
    }
}

/// Movement lifecycle: `PENDING → EXECUTING → {COMPLETED | FAILED}`.
///
/// A pending movement that is never attempted may fail directly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl MovementStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MovementStatus::Completed | MovementStatus::Failed)
    }

    pub fn can_transition_to(self, next: MovementStatus) -> bool {
        use MovementStatus::*;
        matches!(
            (self, next),
            (Pending, Executing) | (Pending, Failed) | (Executing, Completed) | (Executing, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementStatus::Pending => "PENDING",
            MovementStatus::Executing => "EXECUTING",
            MovementStatus::Completed => "COMPLETED",
            MovementStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for MovementStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(MovementStatus::Pending),
            "EXECUTING" => Ok(MovementStatus::Executing),
            "COMPLETED" => Ok(MovementStatus::Completed),
            "FAILED" => Ok(MovementStatus::Failed),
            other => Err(DomainError::validation(format!("unknown movement status: {other}"))),
        }
    }
}

/// Immutable ledger entry for one inventory-affecting event.
///
/// Only the status (and the failure reason that accompanies `FAILED`) may
/// change after the entry is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub movement_type: MovementType,
    pub item_id: ItemId,
    pub batch_number: Option<String>,
    pub quantity: u32,
    pub priority: Priority,
    pub from_bin: Option<BinId>,
    pub to_bin: Option<BinId>,
    pub user_id: UserId,
    status: MovementStatus,
    failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Fields needed to record a new movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub item_id: ItemId,
    pub batch_number: Option<String>,
    pub quantity: u32,
    pub priority: Priority,
    pub from_bin: Option<BinId>,
    pub to_bin: Option<BinId>,
    pub user_id: UserId,
}

impl Movement {
    /// Record a movement in the given initial status.
    pub fn record(
        id: MovementId,
        new: NewMovement,
        status: MovementStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if new.quantity == 0 {
            return Err(DomainError::validation("movement quantity must be positive"));
        }
        if new.from_bin.is_none() && new.to_bin.is_none() {
            return Err(DomainError::validation(
                "movement must reference a source or a destination bin",
            ));
        }
        Ok(Self {
            id,
            movement_type: new.movement_type,
            item_id: new.item_id,
            batch_number: new.batch_number,
            quantity: new.quantity,
            priority: new.priority,
            from_bin: new.from_bin,
            to_bin: new.to_bin,
            user_id: new.user_id,
            status,
            failure_reason: None,
            created_at: at,
            updated_at: at,
        })
    }

    /// Rehydrate a stored ledger entry.
    pub fn restore(
        id: MovementId,
        new: NewMovement,
        status: MovementStatus,
        failure_reason: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            movement_type: new.movement_type,
            item_id: new.item_id,
            batch_number: new.batch_number,
            quantity: new.quantity,
            priority: new.priority,
            from_bin: new.from_bin,
            to_bin: new.to_bin,
            user_id: new.user_id,
            status,
            failure_reason,
            created_at,
            updated_at,
        }
    }

    pub fn status(&self) -> MovementStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The bin whose stock this movement changes.
    pub fn affected_bin(&self) -> Option<BinId> {
        match self.movement_type {
            MovementType::Putaway => self.to_bin,
            _ => self.from_bin.or(self.to_bin),
        }
    }

    pub fn transition(&mut self, next: MovementStatus, at: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "movement {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(MovementStatus::Failed, at)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Event for Movement {
    fn event_type(&self) -> &'static str {
        match self.movement_type {
            MovementType::Putaway => "movement.putaway",
            MovementType::Picking => "movement.picking",
            MovementType::Transfer => "movement.transfer",
            MovementType::Adjustment => "movement.adjustment",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
