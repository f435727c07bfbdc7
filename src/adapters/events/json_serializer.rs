//! JSON event serializer backed by the type registry.

use std::sync::Arc;

use crate::domain::foundation::{
    AnyEvent, DomainError, ErrorCode, EventType, EventTypeInfo, EventTypeRegistry,
};
use crate::ports::EventSerializer;

/// Serializes payloads as UTF-8 JSON.
///
/// Type identifiers are the registry's precise identifiers
/// (`"{name}:v{version}"`). Only registered types resolve.
#[derive(Debug, Clone)]
pub struct JsonEventSerializer {
    registry: Arc<EventTypeRegistry>,
}

impl JsonEventSerializer {
    pub fn new(registry: Arc<EventTypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<EventTypeRegistry> {
        &self.registry
    }
}

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, event: &AnyEvent) -> Result<Vec<u8>, DomainError> {
        let info = self.registry.get(event.event_type_id()).ok_or_else(|| {
            DomainError::invalid_argument(
                "event",
                format!("Event type {} is not registered", event.name()),
            )
        })?;
        let value = info.encode(event).map_err(|e| {
            DomainError::new(
                ErrorCode::SerializationFailed,
                format!("Failed to serialize {}: {}", info.identifier(), e),
            )
        })?;
        serde_json::to_vec(&value).map_err(|e| {
            DomainError::new(
                ErrorCode::SerializationFailed,
                format!("Failed to encode {}: {}", info.identifier(), e),
            )
        })
    }

    fn deserialize(&self, data: &[u8], event_type: &EventTypeInfo) -> Option<AnyEvent> {
        let value = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(event_type = event_type.identifier(), error = %e, "Payload is not valid JSON");
                return None;
            }
        };
        match event_type.decode(value) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(event_type = event_type.identifier(), error = %e, "Payload does not match event type");
                None
            }
        }
    }

    fn type_identifier(&self, event_type: &EventTypeInfo) -> String {
        event_type.identifier().to_string()
    }

    fn resolve_type(&self, identifier: &str) -> Option<EventType> {
        self.registry.find_by_identifier(identifier)
    }
}
