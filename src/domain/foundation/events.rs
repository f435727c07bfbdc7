//! Event infrastructure for distributed event publishing and handling.
//!
//! This module provides the core types and traits for event delivery:
//! - `Event` - Trait that all distributed events implement
//! - `AnyEvent` - Type-erased, cheaply clonable event value used by dispatch
//! - `EventContext` - Delivery context (message id, correlation, source)
//! - `distributed_event!` - Macro to simplify Event implementations

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

// ============================================
// Event Trait
// ============================================

/// Trait that all distributed events must implement.
///
/// `NAME` is the stable, human-readable label that travels with the event
/// across process boundaries. `VERSION` disambiguates incompatible shapes
/// that share a label. Use the `distributed_event!` macro to implement it.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable label (e.g., "orders.order_placed").
    const NAME: &'static str;

    /// Schema version of the payload.
    const VERSION: u32 = 1;
}

/// Macro to implement the `Event` trait with minimal boilerplate.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct OrderPlaced {
///     pub order_id: String,
///     pub total_cents: i64,
/// }
///
/// distributed_event!(OrderPlaced, name = "orders.order_placed");
/// distributed_event!(OrderShipped, name = "orders.order_shipped", version = 2);
/// ```
#[macro_export]
macro_rules! distributed_event {
    ($event:ty, name = $name:expr) => {
        impl $crate::domain::foundation::Event for $event {
            const NAME: &'static str = $name;
        }
    };
    ($event:ty, name = $name:expr, version = $version:expr) => {
        impl $crate::domain::foundation::Event for $event {
            const NAME: &'static str = $name;
            const VERSION: u32 = $version;
        }
    };
}

// Re-export the macro
pub use distributed_event;

// ============================================
// EventSource
// ============================================

/// Where a dispatched event entered the local bus from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Published in-process without an outbox.
    #[default]
    Direct,
    /// Re-published by an outbox sender.
    Outbox,
    /// Dispatched by an inbox processor.
    Inbox,
    /// Received directly from a broker subscription.
    Broker,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventSource::Direct => "direct",
            EventSource::Outbox => "outbox",
            EventSource::Inbox => "inbox",
            EventSource::Broker => "broker",
        };
        write!(f, "{}", s)
    }
}

// ============================================
// EventContext
// ============================================

/// Delivery context that travels with an event through dispatch.
///
/// `message_id` is stable across redeliveries of the same message
/// (outbox record id, broker message id, inbox message id), which is
/// what consumer-side idempotency keys on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub source: EventSource,
}

impl EventContext {
    /// Creates a context for the given source.
    pub fn from_source(source: EventSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Sets the correlation id, if any.
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

// ============================================
// AnyEvent
// ============================================

/// Type-erased event value.
///
/// Cloning is cheap: the payload is shared behind an `Arc`.
#[derive(Clone)]
pub struct AnyEvent {
    type_id: TypeId,
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    context: EventContext,
}

impl AnyEvent {
    /// Wraps a concrete event.
    pub fn new<E: Event>(event: E) -> Self {
        Self::from_arc(Arc::new(event))
    }

    /// Wraps an already shared concrete event.
    pub fn from_arc<E: Event>(event: Arc<E>) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::NAME,
            value: event,
            context: EventContext::default(),
        }
    }

    pub(crate) fn from_parts(
        type_id: TypeId,
        name: &'static str,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            type_id,
            name,
            value,
            context: EventContext::default(),
        }
    }

    /// Returns the `TypeId` of the concrete event.
    pub fn event_type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the event label.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the delivery context.
    pub fn context(&self) -> &EventContext {
        &self.context
    }

    /// Replaces the delivery context.
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }

    /// Sets the correlation id carried by this event.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.context.correlation_id = Some(correlation_id.into());
        self
    }

    /// Checks whether the concrete event is an `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Borrows the concrete event if it is an `E`.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.value.downcast_ref::<E>()
    }

    /// Shares the concrete event if it is an `E`.
    pub fn downcast<E: Event>(&self) -> Option<Arc<E>> {
        self.value.clone().downcast::<E>().ok()
    }

    pub(crate) fn value(&self) -> &(dyn Any + Send + Sync) {
        self.value.as_ref()
    }
}

impl fmt::Debug for AnyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyEvent")
            .field("name", &self.name)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UserRegistered {
        user_id: String,
    }

    distributed_event!(UserRegistered, name = "users.user_registered");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct UserRenamed {
        user_id: String,
    }

    distributed_event!(UserRenamed, name = "users.user_renamed", version = 3);

    #[test]
    fn macro_sets_name_and_default_version() {
        assert_eq!(UserRegistered::NAME, "users.user_registered");
        assert_eq!(UserRegistered::VERSION, 1);
        assert_eq!(UserRenamed::VERSION, 3);
    }

    #[test]
    fn any_event_downcasts_to_concrete_type() {
        let event = AnyEvent::new(UserRegistered {
            user_id: "u-1".to_string(),
        });

        assert!(event.is::<UserRegistered>());
        assert!(!event.is::<UserRenamed>());
        assert_eq!(event.name(), "users.user_registered");
        assert_eq!(
            event.downcast_ref::<UserRegistered>().map(|e| e.user_id.as_str()),
            Some("u-1")
        );
        assert!(event.downcast::<UserRenamed>().is_none());
    }

    #[test]
    fn clones_share_the_same_payload() {
        let event = AnyEvent::new(UserRegistered {
            user_id: "u-2".to_string(),
        });
        let copy = event.clone();

        let a = event.downcast::<UserRegistered>().unwrap();
        let b = copy.downcast::<UserRegistered>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn context_defaults_to_direct_source() {
        let event = AnyEvent::new(UserRegistered {
            user_id: "u-3".to_string(),
        })
        .with_correlation_id("corr-1");

        assert_eq!(event.context().source, EventSource::Direct);
        assert_eq!(event.context().correlation_id.as_deref(), Some("corr-1"));
        assert!(event.context().message_id.is_none());
    }

    #[test]
    fn event_source_displays_lowercase() {
        assert_eq!(EventSource::Outbox.to_string(), "outbox");
        assert_eq!(EventSource::Broker.to_string(), "broker");
    }
}
