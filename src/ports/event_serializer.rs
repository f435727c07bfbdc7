//! EventSerializer port - Payload encoding and type identification.

use crate::domain::foundation::{AnyEvent, DomainError, EventType, EventTypeInfo};

/// Encodes event payloads and maps event types to stable identifiers.
///
/// Implementations must round-trip: deserializing the bytes produced by
/// `serialize` with the same type yields an equal event.
pub trait EventSerializer: Send + Sync {
    /// Encodes the event's payload.
    fn serialize(&self, event: &AnyEvent) -> Result<Vec<u8>, DomainError>;

    /// Decodes a payload as `event_type`. `None` if the bytes don't fit.
    fn deserialize(&self, data: &[u8], event_type: &EventTypeInfo) -> Option<AnyEvent>;

    /// Stable identifier written next to payloads.
    fn type_identifier(&self, event_type: &EventTypeInfo) -> String;

    /// Maps an identifier back to a type known to this process.
    fn resolve_type(&self, identifier: &str) -> Option<EventType>;
}
