//! Ledger events and their publication.
//!
//! Committed movements are facts; this crate defines how they are described
//! (`Event`), wrapped with ledger metadata (`EventEnvelope`) and fanned out to
//! interested consumers (`EventBus`).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, Sequenced};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
