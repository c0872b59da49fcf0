use chrono::{DateTime, Utc};

/// A committed fact that can be published (a completed putaway, a failed
/// pick stop).
///
/// `event_type` names the routing key subscribers filter on; `version` is
/// the payload schema revision so consumers can reject shapes they do not
/// understand.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted routing key, e.g. `movement.picking`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Business time of the last state change.
    fn occurred_at(&self) -> DateTime<Utc>;
}
