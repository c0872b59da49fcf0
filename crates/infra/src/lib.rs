//! Infrastructure layer: persistence, configuration and the transactional
//! executor that turns placement and picking decisions into committed
//! stock changes.

pub mod config;
pub mod engine;
pub mod error;
pub mod store;


pub use config::{ConfigError, EngineConfig};
pub use engine::{DefaultBus, MOVEMENT_STREAM, MovementEnvelope, SlottingEngine};
pub use error::EngineError;
pub use store::{
    CommitReceipt, InMemoryInventoryStore, InventoryStore, LedgerEntry, LedgerWrite,
    PostgresInventoryStore, SCHEMA, StoreError, UnitOfWork,
};
