//! Persistence boundary of the engine.
//!
//! A store owns the authoritative topology (bin loads, stored batches) and the
//! movement ledger, and applies each unit of work atomically.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::{PostgresInventoryStore, SCHEMA};
pub use r#trait::{
    CommitReceipt, InventoryStore, LedgerEntry, LedgerWrite, StoreError, UnitOfWork,
};
