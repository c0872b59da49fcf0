use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope for a committed event, carrying ledger metadata.
///
/// Notes:
/// - `stream` names the ledger the event was appended to (e.g. "movements").
/// - `sequence_number` is the monotonically increasing ledger position.
/// - `payload` is the domain event itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    stream: String,
    event_type: String,

    /// Monotonically increasing position in the ledger.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        stream: impl Into<String>,
        event_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream: stream.into(),
            event_type: event_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

/// A message that knows its position in the ledger.
pub trait Sequenced {
    fn sequence(&self) -> u64;
}

impl<E> Sequenced for EventEnvelope<E> {
    fn sequence(&self) -> u64 {
        self.sequence_number
    }
}
