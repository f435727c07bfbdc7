//! Immutable envelopes carried through the outbox and inbox.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::foundation::Timestamp;

/// An event on its way out of this process.
///
/// `event_name` is the serializer's type identifier, never a raw
/// in-process type handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEventInfo {
    pub id: Uuid,
    pub event_name: String,
    pub event_data: Vec<u8>,
    pub created_at: Timestamp,
    pub correlation_id: Option<String>,
}

impl OutgoingEventInfo {
    /// Creates an envelope with a fresh id, stamped now.
    pub fn new(event_name: impl Into<String>, event_data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_name: event_name.into(),
            event_data,
            created_at: Timestamp::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }
}

/// An event received from a broker.
///
/// `message_id` is the broker's id for the delivery; inboxes use it to
/// reject duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingEventInfo {
    pub id: Uuid,
    pub message_id: String,
    pub event_name: String,
    pub event_data: Vec<u8>,
    pub received_at: Timestamp,
    pub correlation_id: Option<String>,
}

impl IncomingEventInfo {
    /// Creates an envelope with a fresh id, stamped now.
    pub fn new(
        message_id: impl Into<String>,
        event_name: impl Into<String>,
        event_data: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id: message_id.into(),
            event_name: event_name.into(),
            event_data,
            received_at: Timestamp::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_received_at(mut self, received_at: Timestamp) -> Self {
        self.received_at = received_at;
        self
    }
}
