//! Copy-on-write handler registry.
//!
//! Dispatch takes a snapshot (an `Arc` clone) and never holds a lock while
//! handlers run. Subscribe and unsubscribe build a new map and swap it in,
//! so a snapshot is never observed half-mutated.
//!
//! Non-reentrant handlers are serialized per subscriber: every entry whose
//! handler shares an identity shares one gate, whichever type it is
//! registered under.

use async_trait::async_trait;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, Weak};
use tokio::sync::Mutex;

use crate::domain::foundation::{AnyEvent, DomainError};
use crate::ports::{EventHandler, Unsubscribe};

/// One registered handler.
#[derive(Clone)]
pub(crate) struct HandlerEntry {
    id: u64,
    handler: Arc<dyn EventHandler>,
    gate: Arc<Mutex<()>>,
}

impl HandlerEntry {
    pub fn identity(&self) -> usize {
        self.handler.identity()
    }

    pub fn name(&self) -> &'static str {
        self.handler.name()
    }

    /// Runs the handler, serialized with itself unless it is reentrant.
    pub async fn invoke(&self, event: AnyEvent) -> Result<(), DomainError> {
        if self.handler.is_reentrant() {
            return self.handler.handle(event).await;
        }
        let _turn = self.gate.lock().await;
        self.handler.handle(event).await
    }
}

pub(crate) type HandlerMap = HashMap<TypeId, Arc<Vec<HandlerEntry>>>;

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    handlers: RwLock<Arc<HandlerMap>>,
    /// One gate per handler identity with at least one live entry.
    gates: StdMutex<HashMap<usize, Arc<Mutex<()>>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current handlers, safe to iterate while others subscribe.
    pub fn snapshot(&self) -> Arc<HandlerMap> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Appends a handler for `type_id` and returns its entry id.
    pub fn add(&self, type_id: TypeId, handler: Arc<dyn EventHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut current = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let gate = self
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(handler.identity())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let entry = HandlerEntry { id, handler, gate };

        let mut next: HandlerMap = current.as_ref().clone();
        let mut entries = next
            .get(&type_id)
            .map(|list| list.as_ref().clone())
            .unwrap_or_default();
        entries.push(entry);
        next.insert(type_id, Arc::new(entries));
        *current = Arc::new(next);
        id
    }

    /// Removes exactly the entry with `id`. Returns false if it was gone.
    pub fn remove(&self, type_id: TypeId, id: u64) -> bool {
        let mut current = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = current.get(&type_id) else {
            return false;
        };
        if !list.iter().any(|entry| entry.id == id) {
            return false;
        }

        let mut removed = None;
        let mut remaining = Vec::with_capacity(list.len());
        for entry in list.iter() {
            if entry.id == id {
                removed = Some(entry.identity());
            } else {
                remaining.push(entry.clone());
            }
        }
        let mut next: HandlerMap = current.as_ref().clone();
        if remaining.is_empty() {
            next.remove(&type_id);
        } else {
            next.insert(type_id, Arc::new(remaining));
        }

        if let Some(identity) = removed {
            let still_subscribed = next
                .values()
                .any(|entries| entries.iter().any(|e| e.identity() == identity));
            if !still_subscribed {
                self.gates
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&identity);
            }
        }
        *current = Arc::new(next);
        true
    }

    pub fn handler_count(&self, type_id: TypeId) -> usize {
        self.snapshot().get(&type_id).map_or(0, |list| list.len())
    }
}

/// Guard that removes one local registration.
pub(crate) struct LocalUnsubscribe {
    registry: Weak<SubscriptionRegistry>,
    type_id: TypeId,
    id: u64,
}

impl LocalUnsubscribe {
    pub fn new(registry: &Arc<SubscriptionRegistry>, type_id: TypeId, id: u64) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            type_id,
            id,
        }
    }
}

#[async_trait]
impl Unsubscribe for LocalUnsubscribe {
    async fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.type_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl EventHandler for Named {
        async fn handle(&self, _event: AnyEvent) -> Result<(), DomainError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn names(registry: &SubscriptionRegistry, type_id: TypeId) -> Vec<&'static str> {
        registry
            .snapshot()
            .get(&type_id)
            .map(|list| list.iter().map(|e| e.name()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn add_keeps_insertion_order() {
        let registry = SubscriptionRegistry::new();
        let key = TypeId::of::<u8>();
        registry.add(key, Arc::new(Named("first")));
        registry.add(key, Arc::new(Named("second")));

        assert_eq!(names(&registry, key), vec!["first", "second"]);
    }

    #[test]
    fn remove_drops_only_the_given_entry() {
        let registry = SubscriptionRegistry::new();
        let key = TypeId::of::<u8>();
        let handler: Arc<dyn EventHandler> = Arc::new(Named("same"));
        let first = registry.add(key, handler.clone());
        registry.add(key, handler);

        assert!(registry.remove(key, first));
        assert!(!registry.remove(key, first));
        assert_eq!(registry.handler_count(key), 1);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let registry = SubscriptionRegistry::new();
        let key = TypeId::of::<u8>();
        let id = registry.add(key, Arc::new(Named("kept")));

        let before = registry.snapshot();
        registry.remove(key, id);
        registry.add(key, Arc::new(Named("new")));

        let names: Vec<_> = before[&key].iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["kept"]);
    }

    #[test]
    fn same_handler_shares_one_gate_across_types() {
        let registry = SubscriptionRegistry::new();
        let handler: Arc<dyn EventHandler> = Arc::new(Named("shared"));
        let first = registry.add(TypeId::of::<u8>(), handler.clone());
        registry.add(TypeId::of::<u16>(), handler);
        registry.add(TypeId::of::<u16>(), Arc::new(Named("other")));

        let snapshot = registry.snapshot();
        let byte = &snapshot[&TypeId::of::<u8>()][0];
        let word = &snapshot[&TypeId::of::<u16>()];
        assert!(Arc::ptr_eq(&byte.gate, &word[0].gate));
        assert!(!Arc::ptr_eq(&byte.gate, &word[1].gate));

        registry.remove(TypeId::of::<u8>(), first);
        assert_eq!(registry.gates.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn local_unsubscribe_outliving_registry_is_harmless() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let key = TypeId::of::<u8>();
        let id = registry.add(key, Arc::new(Named("gone")));
        let mut guard = LocalUnsubscribe::new(&registry, key, id);

        drop(registry);
        guard.unsubscribe().await;
    }
}
