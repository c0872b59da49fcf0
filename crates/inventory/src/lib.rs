//! Warehouse inventory model.
//!
//! Storage topology (zone → aisle → rack → bin), stored batches, the movement
//! ledger entry, and the hard-constraint Candidate Filter. Everything here is
//! deterministic domain logic (no IO, no storage).

pub mod bin;
pub mod filter;
pub mod item;
pub mod location;
pub mod movement;
pub mod stock;
pub mod topology;

pub use bin::{Bin, BinItem, BinStatus};
pub use filter::{CandidateFilter, Candidates, PutawayConstraints, Rejection, RejectionTally};
pub use item::Item;
pub use location::{Aisle, AisleIdx, BinIdx, Rack, RackIdx, Zone, ZoneIdx};
pub use movement::{Movement, MovementStatus, MovementType, NewMovement};
pub use stock::{AppliedChange, StockChange, StockError};
pub use topology::{StorageTopology, TopologyBuilder};
