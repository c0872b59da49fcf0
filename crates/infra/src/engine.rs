//! Slotting engine: the boundary operations and the transactional executor.
//!
//! ```text
//! find_placement / plan_picking_route          (pure, over a snapshot)
//!   ↓
//! commit_placement / commit_picking_route      (store re-validates, applies atomically)
//!   ↓
//! publish committed movements                   (optional bus, after commit)
//! ```
//!
//! The engine never retries on its own. A stale precondition comes back as
//! [`EngineError::Conflict`] and the caller decides whether to re-run
//! find-then-commit.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use slotwise_core::{BinId, Clock, ExpectedVersion, MovementId, SystemClock, UserId};
use slotwise_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
use slotwise_inventory::{
    BinStatus, CandidateFilter, Movement, MovementStatus, MovementType, NewMovement, StockChange,
    StorageTopology,
};
use slotwise_picking::{PickingPlan, PickingRequest, PickingRoute, RoutePlanner, RouteStop};
use slotwise_putaway::{Placement, PlacementResult, PlacementScorer, PutawayRequest};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::{CommitReceipt, InventoryStore, LedgerEntry, LedgerWrite, UnitOfWork};

/// Ledger stream name used on published envelopes.
pub const MOVEMENT_STREAM: &str = "movements";

pub type MovementEnvelope = EventEnvelope<Movement>;

/// Bus type used when the engine is built without an explicit one.
pub type DefaultBus = Arc<InMemoryEventBus<MovementEnvelope>>;

/// Putaway and picking over one inventory store.
///
/// Scoring and planning read a snapshot and touch no shared state, so one
/// engine can serve concurrent requests. Conflicting commits on the same bin
/// are serialized by the store.
#[derive(Debug)]
pub struct SlottingEngine<S, C = SystemClock, B = DefaultBus> {
    store: S,
    clock: C,
    scorer: PlacementScorer,
    planner: RoutePlanner,
    bus: Option<B>,
}

impl<S, C> SlottingEngine<S, C> {
    pub fn new(store: S, clock: C, config: &EngineConfig) -> Self {
        Self {
            store,
            clock,
            scorer: PlacementScorer::new(config.scoring).with_alternatives(config.alternatives),
            planner: RoutePlanner::new(config.routing),
            bus: None,
        }
    }
}

impl<S, C, B> SlottingEngine<S, C, B> {
    /// Publish every committed movement to `bus`.
    pub fn with_bus<B2>(self, bus: B2) -> SlottingEngine<S, C, B2> {
        SlottingEngine {
            store: self.store,
            clock: self.clock,
            scorer: self.scorer,
            planner: self.planner,
            bus: Some(bus),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn scorer(&self) -> &PlacementScorer {
        &self.scorer
    }

    pub fn planner(&self) -> &RoutePlanner {
        &self.planner
    }
}

impl<S, C, B> SlottingEngine<S, C, B>
where
    S: InventoryStore,
    C: Clock,
    B: EventBus<MovementEnvelope>,
{
    /// Score every admissible bin for `request` and pick the best one.
    #[instrument(
        skip(self, request),
        fields(
            item_id = %request.item_id,
            quantity = request.quantity,
            priority = request.priority.as_str()
        ),
        err
    )]
    pub fn find_placement(&self, request: &PutawayRequest) -> Result<Placement, EngineError> {
        let topology = self.store.snapshot()?;
        let placement = self.scorer.find_placement(&topology, request)?;
        if let Placement::NoSuitableLocation(none) = &placement {
            warn!(reason = ?none.reason, "{}", none.message());
        }
        Ok(placement)
    }

    /// Store `result`'s quantity in `bin_id` and record a COMPLETED putaway.
    ///
    /// `bin_id` is normally the chosen bin or one of the alternatives, committed
    /// against the version read while scoring. Any other bin is first checked
    /// against the current snapshot.
    #[instrument(
        skip(self, result),
        fields(item_id = %result.item_id, bin_id = %bin_id, quantity = result.quantity),
        err
    )]
    pub fn commit_placement(
        &self,
        result: &PlacementResult,
        bin_id: BinId,
        user_id: UserId,
    ) -> Result<Movement, EngineError> {
        let expected = match result.candidate(bin_id) {
            Some(candidate) => ExpectedVersion::Exact(candidate.bin_version),
            None => {
                let topology = self.store.snapshot()?;
                ExpectedVersion::Exact(revalidate_destination(&topology, result, bin_id)?)
            }
        };

        let now = self.clock.now();
        let new = NewMovement {
            movement_type: MovementType::Putaway,
            item_id: result.item_id,
            batch_number: result.batch_number.clone(),
            quantity: result.quantity,
            priority: result.priority,
            from_bin: None,
            to_bin: Some(bin_id),
            user_id,
        };
        let id = MovementId::new();
        let movement = Movement::record(id, new.clone(), MovementStatus::Completed, now)?;

        let work = UnitOfWork {
            bin_id,
            expected_version: expected,
            change: StockChange::Receive {
                item_id: result.item_id,
                batch_number: result.batch_number.clone(),
                expiry_date: result.expiry_date,
                quantity: result.quantity,
            },
            ledger: LedgerWrite::Append(movement),
        };

        match self.store.commit(work) {
            Ok(receipt) => {
                info!(
                    movement_id = %receipt.movement.id,
                    bin_load = receipt.applied.current_load,
                    bin_version = receipt.applied.version,
                    "putaway committed"
                );
                self.publish(&receipt);
                Ok(receipt.movement)
            }
            Err(err) => {
                let err = EngineError::from(err);
                match &err {
                    EngineError::Conflict(msg) => warn!(%msg, "putaway rejected by a concurrent change"),
                    EngineError::Persistence(_) | EngineError::Timeout(_) => {
                        error!(error = %err, "putaway could not be committed");
                        self.record_failed(id, new, &err);
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// Allocate, sequence and split the request into routes.
    #[instrument(skip(self, request), fields(lines = request.lines.len()), err)]
    pub fn plan_picking_route(&self, request: &PickingRequest) -> Result<PickingPlan, EngineError> {
        let topology = self.store.snapshot()?;
        let plan = self.planner.plan(&topology, request)?;
        for line in &plan.unsatisfied_lines {
            warn!(
                line = line.line,
                item_id = %line.item_id,
                requested = line.requested,
                planned = line.planned,
                reason = ?line.reason,
                "pick line only partially satisfiable"
            );
        }
        info!(
            routes = plan.routes.len(),
            stops = plan.stop_count(),
            distance = plan.total_distance(),
            "picking plan built"
        );
        Ok(plan)
    }

    /// Execute `routes` stop by stop.
    ///
    /// Every stop is first recorded as a PENDING movement. Each stop then moves
    /// to EXECUTING and, together with its stock issue, to COMPLETED; a stop
    /// whose commit is rejected ends FAILED with the reason and later stops
    /// still run. Stops on the same bin are committed against the version the
    /// previous stop left behind, so a foreign change in between is detected.
    ///
    /// Returns one movement per stop, in route order.
    #[instrument(
        skip(self, routes),
        fields(routes = routes.len(), stops = routes.iter().map(|r| r.stops.len()).sum::<usize>()),
        err
    )]
    pub fn commit_picking_route(
        &self,
        routes: &[PickingRoute],
        user_id: UserId,
    ) -> Result<Vec<Movement>, EngineError> {
        let stops: Vec<&RouteStop> = routes.iter().flat_map(|r| r.stops.iter()).collect();
        if stops.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let pending = stops
            .iter()
            .map(|stop| {
                Movement::record(
                    MovementId::new(),
                    NewMovement {
                        movement_type: MovementType::Picking,
                        item_id: stop.item_id,
                        batch_number: stop.batch_number.clone(),
                        quantity: stop.quantity,
                        priority: stop.priority,
                        from_bin: Some(stop.bin_id),
                        to_bin: None,
                        user_id,
                    },
                    MovementStatus::Pending,
                    now,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<MovementId> = pending.iter().map(|m| m.id).collect();
        self.store.append_movements(pending)?;

        let mut expected: HashMap<BinId, u64> = HashMap::new();
        let mut out = Vec::with_capacity(stops.len());
        for (stop, id) in stops.into_iter().zip(ids) {
            let version = *expected.entry(stop.bin_id).or_insert(stop.bin_version);
            match self.execute_stop(stop, id, version) {
                Ok(receipt) => {
                    expected.insert(stop.bin_id, receipt.applied.version);
                    self.publish(&receipt);
                    out.push(receipt.movement);
                }
                Err(err) => {
                    match &err {
                        EngineError::Persistence(_) | EngineError::Timeout(_) => {
                            error!(bin = %stop.bin_code, error = %err, "pick stop could not be committed")
                        }
                        _ => warn!(bin = %stop.bin_code, error = %err, "pick stop failed"),
                    }
                    let failed = self
                        .store
                        .transition_movement(
                            id,
                            MovementStatus::Failed,
                            Some(err.to_string()),
                            self.clock.now(),
                        )
                        .map_err(|mark| {
                            error!(movement_id = %id, error = %mark, "could not mark pick movement FAILED");
                            EngineError::from(mark)
                        })?;
                    out.push(failed.movement);
                }
            }
        }

        let completed = out
            .iter()
            .filter(|m| m.status() == MovementStatus::Completed)
            .count();
        info!(completed, failed = out.len() - completed, "picking routes committed");
        Ok(out)
    }

    pub fn snapshot(&self) -> Result<StorageTopology, EngineError> {
        Ok(self.store.snapshot()?)
    }

    /// Whole movement ledger in append order.
    pub fn movements(&self) -> Result<Vec<LedgerEntry>, EngineError> {
        Ok(self.store.movements()?)
    }

    pub fn movements_for_bin(&self, bin_id: BinId) -> Result<Vec<LedgerEntry>, EngineError> {
        Ok(self.store.movements_for_bin(bin_id)?)
    }

    /// Block, unblock or retire a bin. Returns the new bin version.
    #[instrument(skip(self), fields(bin_id = %bin_id, status = status.as_str()), err)]
    pub fn set_bin_status(&self, bin_id: BinId, status: BinStatus) -> Result<u64, EngineError> {
        let version = self.store.set_bin_status(bin_id, status)?;
        info!(version, "bin status changed");
        Ok(version)
    }

    fn execute_stop(
        &self,
        stop: &RouteStop,
        id: MovementId,
        version: u64,
    ) -> Result<CommitReceipt, EngineError> {
        self.store
            .transition_movement(id, MovementStatus::Executing, None, self.clock.now())?;
        let receipt = self.store.commit(UnitOfWork {
            bin_id: stop.bin_id,
            expected_version: ExpectedVersion::Exact(version),
            change: StockChange::Issue {
                item_id: stop.item_id,
                batch_number: stop.batch_number.clone(),
                quantity: stop.quantity,
            },
            ledger: LedgerWrite::Transition {
                movement_id: id,
                to: MovementStatus::Completed,
                reason: None,
                at: self.clock.now(),
            },
        })?;
        info!(
            movement_id = %id,
            bin = %stop.bin_code,
            quantity = stop.quantity,
            bin_load = receipt.applied.current_load,
            "pick stop committed"
        );
        Ok(receipt)
    }

    /// Best-effort FAILED ledger entry for a putaway that never committed.
    fn record_failed(&self, id: MovementId, new: NewMovement, err: &EngineError) {
        let now = self.clock.now();
        let failed = Movement::record(id, new, MovementStatus::Pending, now)
            .and_then(|mut m| m.fail(err.to_string(), now).map(|()| m));
        let result = match failed {
            Ok(m) => self.store.append_movements(vec![m]).map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = result {
            error!(movement_id = %id, %reason, "could not record FAILED putaway");
        }
    }

    fn publish(&self, receipt: &CommitReceipt) {
        let Some(bus) = &self.bus else {
            return;
        };
        let movement = receipt.movement.clone();
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            MOVEMENT_STREAM,
            movement.event_type(),
            receipt.sequence,
            movement,
        );
        if let Err(err) = bus.publish(envelope) {
            warn!(sequence = receipt.sequence, error = ?err, "movement committed but not published");
        }
    }
}

/// Check a bin outside the placement result against the current state.
/// Returns the version to commit against.
fn revalidate_destination(
    topology: &StorageTopology,
    result: &PlacementResult,
    bin_id: BinId,
) -> Result<u64, EngineError> {
    let idx = topology
        .bin_idx(bin_id)
        .ok_or_else(|| EngineError::NotFound(format!("bin {bin_id}")))?;
    let item = topology
        .item(result.item_id)
        .ok_or_else(|| EngineError::NotFound(format!("item {}", result.item_id)))?;
    let bin = topology.bin(idx);
    CandidateFilter::new(topology)
        .check_putaway(idx, item, result.quantity, &result.constraints)
        .map_err(|rejection| {
            EngineError::Validation(format!(
                "bin {} cannot take this putaway: {}",
                bin.code,
                rejection.describe()
            ))
        })?;
    Ok(slotwise_core::Versioned::version(bin))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use slotwise_core::{FixedClock, ItemId, Priority, TemperatureClass};
    use slotwise_inventory::{Aisle, Bin, BinItem, Item, Rack, Zone};
    use slotwise_picking::{PickLine, PickingRequest};

    use crate::store::InMemoryInventoryStore;

    struct Fixture {
        engine: SlottingEngine<InMemoryInventoryStore, FixedClock>,
        chilled: BinId,
        ambient: BinId,
        item: ItemId,
    }

    fn fixture() -> Fixture {
        let mut b = StorageTopology::builder();
        let ambient_zone = b.zone(Zone::new("A", TemperatureClass::Ambient));
        let chilled_zone = b.zone(Zone::new("C", TemperatureClass::Chilled));
        let mut rack = |zone, code: &str| {
            let aisle = b
                .aisle(Aisle {
                    zone,
                    code: format!("{code}1"),
                    position: 0,
                    width: 3.0,
                })
                .unwrap();
            b.rack(Rack {
                aisle,
                code: format!("{code}1-R"),
                level: 0,
                row: 0,
                column: 0,
            })
            .unwrap()
        };
        let ra = rack(ambient_zone, "A");
        let rc = rack(chilled_zone, "C");

        let item = Item::new(ItemId::new(), "X", "dry", TemperatureClass::Ambient);
        b.item(item.clone()).unwrap();
        let ambient = BinId::new();
        let chilled = BinId::new();
        b.bin(Bin::new(ambient, "B1", ra, 100)).unwrap();
        b.bin(Bin::new(chilled, "C1", rc, 100)).unwrap();

        let store = InMemoryInventoryStore::new(b.build().unwrap());
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        Fixture {
            engine: SlottingEngine::new(store, clock, &EngineConfig::default()),
            chilled,
            ambient,
            item: item.id,
        }
    }

    fn place(f: &Fixture, qty: u32) -> PlacementResult {
        f.engine
            .find_placement(&PutawayRequest::new(f.item, qty))
            .unwrap()
            .found()
            .unwrap()
    }

    #[test]
    fn committed_putaway_is_completed_and_timestamped() {
        let f = fixture();
        let result = place(&f, 10);
        let m = f
            .engine
            .commit_placement(&result, result.bin_id(), UserId::new())
            .unwrap();

        assert_eq!(m.status(), MovementStatus::Completed);
        assert_eq!(m.to_bin, Some(f.ambient));
        assert_eq!(m.created_at, Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        assert_eq!(f.engine.movements().unwrap().len(), 1);
    }

    #[test]
    fn stale_placement_is_a_retryable_conflict() {
        let f = fixture();
        let first = place(&f, 10);
        let second = place(&f, 10);
        f.engine
            .commit_placement(&first, first.bin_id(), UserId::new())
            .unwrap();

        let err = f
            .engine
            .commit_placement(&second, second.bin_id(), UserId::new())
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.engine.movements().unwrap().len(), 1);
    }

    #[test]
    fn bin_outside_the_result_is_revalidated() {
        let f = fixture();
        let result = place(&f, 10);

        let err = f
            .engine
            .commit_placement(&result, f.chilled, UserId::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = f
            .engine
            .commit_placement(&result, BinId::new(), UserId::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn blocked_destination_conflicts() {
        let f = fixture();
        let result = place(&f, 10);
        f.engine.set_bin_status(f.ambient, BinStatus::Blocked).unwrap();

        let err = f
            .engine
            .commit_placement(&result, result.bin_id(), UserId::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn pick_stop_that_lost_its_stock_fails_alone() {
        let f = fixture();
        let result = place(&f, 10);
        f.engine
            .commit_placement(&result, result.bin_id(), UserId::new())
            .unwrap();

        let request = PickingRequest::new(vec![PickLine::new(f.item, 6, Priority::Medium)]);
        let first = f.engine.plan_picking_route(&request).unwrap();
        let second = f.engine.plan_picking_route(&request).unwrap();

        let done = f
            .engine
            .commit_picking_route(&first.routes, UserId::new())
            .unwrap();
        assert_eq!(done[0].status(), MovementStatus::Completed);

        let failed = f
            .engine
            .commit_picking_route(&second.routes, UserId::new())
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status(), MovementStatus::Failed);
        assert!(failed[0].failure_reason().is_some());

        let topology = f.engine.snapshot().unwrap();
        assert_eq!(topology.bin_by_id(f.ambient).unwrap().current_load(), 4);
    }

    #[test]
    fn empty_route_list_commits_nothing() {
        let f = fixture();
        assert!(f.engine.commit_picking_route(&[], UserId::new()).unwrap().is_empty());
        assert!(f.engine.movements().unwrap().is_empty());
    }

    #[test]
    fn committed_movements_are_published_in_ledger_order() {
        let f = fixture();
        let bus: DefaultBus = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let engine = f.engine.with_bus(bus);

        let result = engine
            .find_placement(&PutawayRequest::new(f.item, 5))
            .unwrap()
            .found()
            .unwrap();
        engine
            .commit_placement(&result, result.bin_id(), UserId::new())
            .unwrap();

        let envelope = subscription.try_recv().unwrap();
        assert_eq!(envelope.stream(), MOVEMENT_STREAM);
        assert_eq!(envelope.event_type(), "movement.putaway");
        assert_eq!(envelope.sequence_number(), 1);
        assert_eq!(envelope.payload().quantity, 5);
    }

    #[test]
    fn stocked_batches_are_drawn_by_expiry() {
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
        b.bin(Bin::new(bin, "B1", rack, 100)).unwrap();
        let late = chrono::NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        let early = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        b.batch(BinItem::new(bin, item.id, 5).with_batch("LATE").with_expiry(late))
            .unwrap();
        b.batch(BinItem::new(bin, item.id, 5).with_batch("EARLY").with_expiry(early))
            .unwrap();

        let engine = SlottingEngine::new(
            InMemoryInventoryStore::new(b.build().unwrap()),
            SystemClock,
            &EngineConfig::default(),
        );
        let plan = engine
            .plan_picking_route(&PickingRequest::new(vec![PickLine::new(
                item.id,
                7,
                Priority::High,
            )]))
            .unwrap();
        let moved = engine.commit_picking_route(&plan.routes, UserId::new()).unwrap();

        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|m| m.status() == MovementStatus::Completed));
        let topology = engine.snapshot().unwrap();
        let idx = topology.bin_idx(bin).unwrap();
        let left = topology.batches(idx);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].batch_number.as_deref(), Some("LATE"));
        assert_eq!(left[0].quantity, 3);
    }
}
