//! Explicit event type registry.
//!
//! Every event type that crosses a process boundary or participates in
//! polymorphic dispatch is registered here once at startup. The registry
//! maps a `TypeId` to its stable identifier, its erased JSON codec and its
//! ancestor chain, so the hot path never needs reflection.

use serde_json::Value as JsonValue;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::events::{AnyEvent, Event};

/// Shared handle to a registered event type.
pub type EventType = Arc<EventTypeInfo>;

type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Result<JsonValue, serde_json::Error>;
type DecodeFn = fn(JsonValue) -> Result<Arc<dyn Any + Send + Sync>, serde_json::Error>;
type UpcastFn = Arc<dyn Fn(&AnyEvent) -> Option<AnyEvent> + Send + Sync>;

fn encode<E: Event>(value: &(dyn Any + Send + Sync)) -> Result<JsonValue, serde_json::Error> {
    match value.downcast_ref::<E>() {
        Some(event) => serde_json::to_value(event),
        None => Err(serde::ser::Error::custom(format!(
            "payload is not a {}",
            std::any::type_name::<E>()
        ))),
    }
}

fn decode<E: Event>(value: JsonValue) -> Result<Arc<dyn Any + Send + Sync>, serde_json::Error> {
    let event: E = serde_json::from_value(value)?;
    Ok(Arc::new(event))
}

/// Builds the precise identifier for a label and version.
pub fn type_identifier(name: &str, version: u32) -> String {
    format!("{}:v{}", name, version)
}

/// An ancestor of a registered type and how to view an event as it.
#[derive(Clone)]
pub struct Ancestor {
    type_id: TypeId,
    name: &'static str,
    upcast: UpcastFn,
}

impl Ancestor {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Converts an event of the descendant type into this ancestor.
    pub fn upcast(&self, event: &AnyEvent) -> Option<AnyEvent> {
        (self.upcast)(event)
    }
}

/// Descriptor of one registered event type.
pub struct EventTypeInfo {
    type_id: TypeId,
    name: &'static str,
    version: u32,
    identifier: String,
    rust_type: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
    ancestors: Vec<Ancestor>,
}

impl EventTypeInfo {
    fn of<E: Event>(ancestors: Vec<Ancestor>) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::NAME,
            version: E::VERSION,
            identifier: type_identifier(E::NAME, E::VERSION),
            rust_type: std::any::type_name::<E>(),
            encode: encode::<E>,
            decode: decode::<E>,
            ancestors,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Human-readable label.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Precise identifier (label plus version).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    /// Ancestors, nearest first.
    pub fn ancestors(&self) -> &[Ancestor] {
        &self.ancestors
    }

    /// Checks whether this type is `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Checks whether an instance of this type can be viewed as `target`.
    pub fn is_assignable_to(&self, target: TypeId) -> bool {
        self.type_id == target || self.ancestors.iter().any(|a| a.type_id == target)
    }

    /// Encodes an event of this type to JSON.
    pub fn encode(&self, event: &AnyEvent) -> Result<JsonValue, serde_json::Error> {
        (self.encode)(event.value())
    }

    /// Decodes JSON into an event of this type.
    pub fn decode(&self, value: JsonValue) -> Result<AnyEvent, serde_json::Error> {
        let value = (self.decode)(value)?;
        Ok(AnyEvent::from_parts(self.type_id, self.name, value))
    }
}

impl fmt::Debug for EventTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTypeInfo")
            .field("identifier", &self.identifier)
            .field("rust_type", &self.rust_type)
            .field(
                "ancestors",
                &self.ancestors.iter().map(|a| a.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    by_type: HashMap<TypeId, EventType>,
    by_identifier: HashMap<String, EventType>,
}

/// Registry of event types known to this process.
///
/// Register base types before their derived types: a derived type captures
/// its parent's ancestor chain at registration time.
#[derive(Default)]
pub struct EventTypeRegistry {
    state: RwLock<RegistryState>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` with no ancestors. Idempotent.
    pub fn register<E: Event>(&self) -> EventType {
        if let Some(existing) = self.get_of::<E>() {
            return existing;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = state.by_type.get(&TypeId::of::<E>()) {
            return existing.clone();
        }
        let info: EventType = Arc::new(EventTypeInfo::of::<E>(Vec::new()));
        Self::insert(&mut state, info.clone());
        info
    }

    /// Registers `E` as derived from `P`.
    ///
    /// Handlers subscribed to `P` (or any of `P`'s ancestors) receive `E`
    /// instances converted through `upcast`. Replaces an earlier
    /// registration of `E`.
    pub fn register_derived<E: Event, P: Event>(&self, upcast: fn(&E) -> P) -> EventType {
        let parent = self.register::<P>();

        let direct: UpcastFn = Arc::new(move |event: &AnyEvent| {
            event
                .downcast_ref::<E>()
                .map(|e| AnyEvent::new(upcast(e)).with_context(event.context().clone()))
        });

        let mut ancestors = vec![Ancestor {
            type_id: TypeId::of::<P>(),
            name: P::NAME,
            upcast: direct.clone(),
        }];
        for grandparent in parent.ancestors() {
            let first = direct.clone();
            let next = grandparent.upcast.clone();
            ancestors.push(Ancestor {
                type_id: grandparent.type_id,
                name: grandparent.name,
                upcast: Arc::new(move |event: &AnyEvent| first(event).and_then(|p| next(&p))),
            });
        }

        let info: EventType = Arc::new(EventTypeInfo::of::<E>(ancestors));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Self::insert(&mut state, info.clone());
        info
    }

    fn insert(state: &mut RegistryState, info: EventType) {
        state
            .by_identifier
            .insert(info.identifier().to_string(), info.clone());
        state.by_type.insert(EventTypeInfo::type_id(&info), info);
    }

    pub fn get(&self, type_id: TypeId) -> Option<EventType> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_type.get(&type_id).cloned()
    }

    pub fn get_of<E: Event>(&self) -> Option<EventType> {
        self.get(TypeId::of::<E>())
    }

    /// Looks up a type by its precise identifier.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<EventType> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_identifier.get(identifier).cloned()
    }

    /// Looks up a type by label, preferring the highest version.
    pub fn find_by_name(&self, name: &str) -> Option<EventType> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .by_type
            .values()
            .filter(|info| info.name() == name)
            .max_by_key(|info| info.version())
            .cloned()
    }

    /// Checks whether `from` instances can be delivered as `to`.
    pub fn is_assignable(&self, from: TypeId, to: TypeId) -> bool {
        if from == to {
            return true;
        }
        self.get(from)
            .map(|info| info.is_assignable_to(to))
            .unwrap_or(false)
    }

    /// Views `event` as `target`, if `target` is its own type or an ancestor.
    pub fn upcast(&self, event: &AnyEvent, target: TypeId) -> Option<AnyEvent> {
        if event.event_type_id() == target {
            return Some(event.clone());
        }
        let info = self.get(event.event_type_id())?;
        let ancestor = info.ancestors().iter().find(|a| a.type_id == target)?;
        ancestor.upcast(event)
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EventTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTypeRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::EventSource;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderEvent {
        order_id: String,
    }
    crate::distributed_event!(OrderEvent, name = "orders.order_event");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        order_id: String,
        total_cents: i64,
    }
    crate::distributed_event!(OrderPlaced, name = "orders.order_placed");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ExpressOrderPlaced {
        order_id: String,
        total_cents: i64,
        courier: String,
    }
    crate::distributed_event!(ExpressOrderPlaced, name = "orders.express_order_placed", version = 2);

    fn hierarchy() -> EventTypeRegistry {
        let registry = EventTypeRegistry::new();
        registry.register::<OrderEvent>();
        registry.register_derived::<OrderPlaced, OrderEvent>(|e| OrderEvent {
            order_id: e.order_id.clone(),
        });
        registry.register_derived::<ExpressOrderPlaced, OrderPlaced>(|e| OrderPlaced {
            order_id: e.order_id.clone(),
            total_cents: e.total_cents,
        });
        registry
    }

    fn express() -> ExpressOrderPlaced {
        ExpressOrderPlaced {
            order_id: "o-1".to_string(),
            total_cents: 1250,
            courier: "bike".to_string(),
        }
    }

    #[test]
    fn register_is_idempotent() {
        let registry = EventTypeRegistry::new();
        let first = registry.register::<OrderEvent>();
        let second = registry.register::<OrderEvent>();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn each_type_is_keyed_by_its_own_type_id() {
        let registry = EventTypeRegistry::new();
        registry.register::<OrderEvent>();
        registry.register::<OrderPlaced>();

        assert_eq!(registry.len(), 2);
        assert!(registry.get_of::<OrderEvent>().unwrap().is::<OrderEvent>());
        assert!(registry.get_of::<OrderPlaced>().unwrap().is::<OrderPlaced>());
        assert!(registry
            .get(TypeId::of::<OrderPlaced>())
            .is_some_and(|info| info.name() == "orders.order_placed"));
    }

    #[test]
    fn identifier_combines_name_and_version() {
        let registry = hierarchy();
        let info = registry.get_of::<ExpressOrderPlaced>().unwrap();

        assert_eq!(info.identifier(), "orders.express_order_placed:v2");
        assert!(registry
            .find_by_identifier("orders.express_order_placed:v2")
            .is_some());
        assert!(registry.find_by_identifier("orders.express_order_placed:v1").is_none());
    }

    #[test]
    fn find_by_name_resolves_label() {
        let registry = hierarchy();
        let info = registry.find_by_name("orders.order_placed").unwrap();
        assert!(info.is::<OrderPlaced>());
        assert!(registry.find_by_name("orders.unknown").is_none());
    }

    #[test]
    fn ancestors_compose_transitively() {
        let registry = hierarchy();
        let info = registry.get_of::<ExpressOrderPlaced>().unwrap();

        let names: Vec<_> = info.ancestors().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["orders.order_placed", "orders.order_event"]);

        assert!(registry.is_assignable(
            TypeId::of::<ExpressOrderPlaced>(),
            TypeId::of::<OrderEvent>()
        ));
        assert!(!registry.is_assignable(
            TypeId::of::<OrderEvent>(),
            TypeId::of::<ExpressOrderPlaced>()
        ));
    }

    #[test]
    fn upcast_converts_through_the_chain_and_keeps_context() {
        let registry = hierarchy();
        let event = AnyEvent::new(express()).with_context(
            crate::domain::foundation::EventContext::from_source(EventSource::Inbox)
                .with_message_id("m-1"),
        );

        let base = registry.upcast(&event, TypeId::of::<OrderEvent>()).unwrap();
        assert_eq!(
            base.downcast_ref::<OrderEvent>(),
            Some(&OrderEvent {
                order_id: "o-1".to_string()
            })
        );
        assert_eq!(base.context().message_id.as_deref(), Some("m-1"));
        assert_eq!(base.context().source, EventSource::Inbox);
    }

    #[test]
    fn upcast_to_unrelated_type_is_none() {
        let registry = hierarchy();
        let event = AnyEvent::new(OrderEvent {
            order_id: "o-2".to_string(),
        });
        assert!(registry
            .upcast(&event, TypeId::of::<OrderPlaced>())
            .is_none());
    }

    #[test]
    fn codec_round_trips_through_json() {
        let registry = hierarchy();
        let info = registry.get_of::<ExpressOrderPlaced>().unwrap();

        let json = info.encode(&AnyEvent::new(express())).unwrap();
        let decoded = info.decode(json).unwrap();

        assert_eq!(decoded.downcast_ref::<ExpressOrderPlaced>(), Some(&express()));
        assert_eq!(decoded.name(), "orders.express_order_placed");
    }

    #[test]
    fn encode_rejects_payload_of_other_type() {
        let registry = hierarchy();
        let info = registry.get_of::<OrderPlaced>().unwrap();
        let other = AnyEvent::new(OrderEvent {
            order_id: "o-3".to_string(),
        });

        assert!(info.encode(&other).is_err());
    }
}
