//! `slotwise-core` : domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;
pub mod version;

pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{BinId, ItemId, MovementId, UserId};
pub use value_object::{HazardLevel, Priority, TemperatureClass, ValueObject};
pub use version::{ExpectedVersion, Versioned};
