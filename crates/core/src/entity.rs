//! Identity shared by bins, items and ledger movements.

/// Something the warehouse tracks by a stable id while its state changes
/// (a bin's load, a movement's status).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Whether `other` is the same tracked thing, whatever its current state.
    fn same_identity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
