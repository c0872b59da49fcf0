use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use slotwise_core::{BinId, MovementId};
use slotwise_inventory::{BinStatus, Movement, MovementStatus, StorageTopology};

use super::r#trait::{
    transitioned, CommitReceipt, InventoryStore, LedgerEntry, LedgerWrite, StoreError, UnitOfWork,
};

#[derive(Debug, Default)]
struct State {
    topology: StorageTopology,
    ledger: Vec<Movement>,
    /// Position in `ledger` of each movement.
    index: HashMap<MovementId, usize>,
}

impl State {
    fn entry(&self, pos: usize) -> LedgerEntry {
        LedgerEntry {
            sequence: pos as u64 + 1,
            movement: self.ledger[pos].clone(),
        }
    }

    fn position(&self, id: MovementId) -> Result<usize, StoreError> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| StoreError::NotFound(format!("movement {id}")))
    }

    fn push(&mut self, movement: Movement) -> usize {
        let pos = self.ledger.len();
        self.index.insert(movement.id, pos);
        self.ledger.push(movement);
        pos
    }
}

/// In-memory inventory store.
///
/// One lock guards the topology and the ledger together, so every unit of
/// work is applied atomically and conflicting commits are serialized.
/// Intended for tests, simulation and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl InMemoryInventoryStore {
    pub fn new(topology: StorageTopology) -> Self {
        Self {
            state: RwLock::new(State {
                topology,
                ..State::default()
            }),
        }
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn snapshot(&self) -> Result<StorageTopology, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.topology.clone())
    }

    fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;

        // Prepare the ledger write first; nothing is mutated until both
        // halves are known to succeed.
        let (movement, existing) = match work.ledger {
            LedgerWrite::Append(movement) => {
                if state.index.contains_key(&movement.id) {
                    return Err(StoreError::Backend(format!(
                        "movement {} already recorded",
                        movement.id
                    )));
                }
                (movement, None)
            }
            LedgerWrite::Transition {
                movement_id,
                to,
                reason,
                at,
            } => {
                let pos = state.position(movement_id)?;
                let next = transitioned(&state.ledger[pos], to, reason, at)?;
                (next, Some(pos))
            }
        };

        let applied = state
            .topology
            .apply(work.bin_id, work.expected_version, &work.change)?;

        let pos = match existing {
            Some(pos) => {
                state.ledger[pos] = movement;
                pos
            }
            None => state.push(movement),
        };
        let entry = state.entry(pos);

        Ok(CommitReceipt {
            applied,
            movement: entry.movement,
            sequence: entry.sequence,
        })
    }

    fn append_movements(&self, movements: Vec<Movement>) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        for (idx, m) in movements.iter().enumerate() {
            if state.index.contains_key(&m.id)
                || movements[..idx].iter().any(|earlier| earlier.id == m.id)
            {
                return Err(StoreError::Backend(format!(
                    "movement {} already recorded",
                    m.id
                )));
            }
        }
        Ok(movements
            .into_iter()
            .map(|m| {
                let pos = state.push(m);
                state.entry(pos)
            })
            .collect())
    }

    fn transition_movement(
        &self,
        movement_id: MovementId,
        to: MovementStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        let pos = state.position(movement_id)?;
        let next = transitioned(&state.ledger[pos], to, reason, at)?;
        state.ledger[pos] = next;
        Ok(state.entry(pos))
    }

    fn movements(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok((0..state.ledger.len()).map(|pos| state.entry(pos)).collect())
    }

    fn movements_for_bin(&self, bin_id: BinId) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .ledger
            .iter()
            .enumerate()
            .filter(|(_, m)| m.from_bin == Some(bin_id) || m.to_bin == Some(bin_id))
            .map(|(pos, _)| state.entry(pos))
            .collect())
    }

    fn set_bin_status(&self, bin_id: BinId, status: BinStatus) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        Ok(state.topology.set_bin_status(bin_id, status)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use slotwise_core::{ExpectedVersion, ItemId, Priority, TemperatureClass, UserId, Versioned};
    use slotwise_inventory::{
        Aisle, Bin, Item, MovementType, NewMovement, Rack, StockChange, Zone,
    };

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn seeded() -> (InMemoryInventoryStore, BinId, ItemId) {
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
        let rack = b
            .rack(Rack {
                aisle,
                code: "R1".into(),
                level: 0,
                row: 0,
                column: 0,
            })
            .unwrap();
        let item = Item::new(ItemId::new(), "X", "dry", TemperatureClass::Ambient);
        b.item(item.clone()).unwrap();
        let bin = BinId::new();
        b.bin(Bin::new(bin, "B1", rack, 50)).unwrap();
        (InMemoryInventoryStore::new(b.build().unwrap()), bin, item.id)
    }

    fn putaway(bin: BinId, item: ItemId, quantity: u32, status: MovementStatus) -> Movement {
        Movement::record(
            MovementId::new(),
            NewMovement {
                movement_type: MovementType::Putaway,
                item_id: item,
                batch_number: None,
                quantity,
                priority: Priority::Medium,
                from_bin: None,
                to_bin: Some(bin),
                user_id: test_user_id(),
            },
            status,
            Utc::now(),
        )
        .unwrap()
    }

    fn receive(item: ItemId, quantity: u32) -> StockChange {
        StockChange::Receive {
            item_id: item,
            batch_number: None,
            expiry_date: None,
            quantity,
        }
    }

    #[test]
    fn commit_applies_stock_and_ledger_together() {
        let (store, bin, item) = seeded();
        let receipt = store
            .commit(UnitOfWork {
                bin_id: bin,
                expected_version: ExpectedVersion::Exact(0),
                change: receive(item, 20),
                ledger: LedgerWrite::Append(putaway(bin, item, 20, MovementStatus::Completed)),
            })
            .unwrap();

        assert_eq!(receipt.applied.current_load, 20);
        assert_eq!(receipt.sequence, 1);
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.bin_by_id(bin).unwrap().current_load(), 20);
        assert_eq!(store.movements_for_bin(bin).unwrap().len(), 1);
    }

    #[test]
    fn stale_version_leaves_state_untouched() {
        let (store, bin, item) = seeded();
        let err = store
            .commit(UnitOfWork {
                bin_id: bin,
                expected_version: ExpectedVersion::Exact(7),
                change: receive(item, 5),
                ledger: LedgerWrite::Append(putaway(bin, item, 5, MovementStatus::Completed)),
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Concurrency(_)));
        assert!(store.movements().unwrap().is_empty());
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.bin_by_id(bin).unwrap().current_load(), 0);
        assert_eq!(snapshot.bin_by_id(bin).unwrap().version(), 0);
    }

    #[test]
    fn invalid_transition_rejects_whole_unit() {
        let (store, bin, item) = seeded();
        let done = putaway(bin, item, 5, MovementStatus::Completed);
        let id = done.id;
        store.append_movements(vec![done]).unwrap();

        let err = store
            .commit(UnitOfWork {
                bin_id: bin,
                expected_version: ExpectedVersion::Any,
                change: receive(item, 5),
                ledger: LedgerWrite::Transition {
                    movement_id: id,
                    to: MovementStatus::Completed,
                    reason: None,
                    at: Utc::now(),
                },
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::InvalidTransition(_)));
        assert_eq!(
            store.snapshot().unwrap().bin_by_id(bin).unwrap().current_load(),
            0
        );
    }

    #[test]
    fn overflow_maps_to_insufficient_capacity() {
        let (store, bin, item) = seeded();
        let err = store
            .commit(UnitOfWork {
                bin_id: bin,
                expected_version: ExpectedVersion::Any,
                change: receive(item, 51),
                ledger: LedgerWrite::Append(putaway(bin, item, 51, MovementStatus::Completed)),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientCapacity(_)));
    }

    #[test]
    fn pending_movement_walks_its_state_machine() {
        let (store, bin, item) = seeded();
        let pending = putaway(bin, item, 5, MovementStatus::Pending);
        let id = pending.id;
        store.append_movements(vec![pending]).unwrap();

        let executing = store
            .transition_movement(id, MovementStatus::Executing, None, Utc::now())
            .unwrap();
        assert_eq!(executing.movement.status(), MovementStatus::Executing);

        let failed = store
            .transition_movement(id, MovementStatus::Failed, Some("timeout".into()), Utc::now())
            .unwrap();
        assert_eq!(failed.movement.failure_reason(), Some("timeout"));

        assert!(matches!(
            store.transition_movement(id, MovementStatus::Completed, None, Utc::now()),
            Err(StoreError::InvalidTransition(_))
        ));
    }

    #[test]
    fn duplicate_movement_ids_are_rejected() {
        let (store, bin, item) = seeded();
        let m = putaway(bin, item, 5, MovementStatus::Pending);
        assert!(store.append_movements(vec![m.clone(), m]).is_err());
        assert!(store.movements().unwrap().is_empty());
    }

    #[test]
    fn blocking_a_bin_bumps_its_version() {
        let (store, bin, _) = seeded();
        assert_eq!(store.set_bin_status(bin, BinStatus::Blocked).unwrap(), 1);
        assert!(matches!(
            store.set_bin_status(BinId::new(), BinStatus::Blocked),
            Err(StoreError::NotFound(_))
        ));
    }
}
