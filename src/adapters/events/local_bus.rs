//! In-process event bus with outbox routing and polymorphic dispatch.
//!
//! # Dispatch
//!
//! An event is delivered to handlers registered for its own type and for
//! every ancestor declared in the type registry. Each handler sees the
//! event converted to the type it subscribed to. A handler reachable from
//! several levels runs once. All handlers run concurrently; when any fail,
//! the rest still complete and one aggregated `HANDLER_FAILED` error is
//! returned with the first failure first.
//!
//! # Outbox routing
//!
//! `publish_event(event, true)` persists one envelope per outbox whose
//! selector matches the event type and returns without dispatching. When
//! no outbox matches, the event is dispatched immediately instead.

use async_trait::async_trait;
use futures::future::join_all;
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use super::store_resolver::StoreResolver;
use super::subscriptions::{HandlerEntry, LocalUnsubscribe, SubscriptionRegistry};
use crate::domain::boxes::{IncomingEventInfo, OutgoingEventInfo};
use crate::domain::foundation::{
    AnyEvent, DomainError, ErrorCode, EventContext, EventSource, EventType, EventTypeRegistry,
};
use crate::ports::{
    DistributedEventBus, EventHandler, EventOutbox, EventSerializer, InboxConfig, OutboxConfig,
    OutboxConfigs, Subscription, SupportsEventBoxes,
};

/// In-process bus.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(EventTypeRegistry::new());
/// let serializer = Arc::new(JsonEventSerializer::new(registry.clone()));
/// let bus = Arc::new(LocalEventBus::new(registry, serializer));
///
/// let subscription = bus.subscribe::<OrderPlaced, _>(mailer).await?;
/// bus.publish(OrderPlaced { .. }, false).await?;
/// subscription.unsubscribe().await;
/// ```
pub struct LocalEventBus {
    registry: Arc<EventTypeRegistry>,
    serializer: Arc<dyn EventSerializer>,
    subscriptions: Arc<SubscriptionRegistry>,
    outboxes: Arc<OutboxConfigs>,
    outbox_stores: Arc<StoreResolver<dyn EventOutbox>>,
}

impl LocalEventBus {
    /// Creates a bus with no outboxes configured.
    pub fn new(registry: Arc<EventTypeRegistry>, serializer: Arc<dyn EventSerializer>) -> Self {
        Self {
            registry,
            serializer,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            outboxes: Arc::new(OutboxConfigs::new()),
            outbox_stores: Arc::new(StoreResolver::new()),
        }
    }

    /// Routes durable publishes through `outboxes`, resolving their stores
    /// with `stores`.
    pub fn with_outboxes(
        mut self,
        outboxes: Arc<OutboxConfigs>,
        stores: Arc<StoreResolver<dyn EventOutbox>>,
    ) -> Self {
        self.outboxes = outboxes;
        self.outbox_stores = stores;
        self
    }

    pub fn registry(&self) -> &Arc<EventTypeRegistry> {
        &self.registry
    }

    pub fn serializer(&self) -> &Arc<dyn EventSerializer> {
        &self.serializer
    }

    pub fn outboxes(&self) -> &Arc<OutboxConfigs> {
        &self.outboxes
    }

    pub fn outbox_stores(&self) -> &Arc<StoreResolver<dyn EventOutbox>> {
        &self.outbox_stores
    }

    /// Number of handlers registered directly for `type_id`.
    pub fn handler_count(&self, type_id: TypeId) -> usize {
        self.subscriptions.handler_count(type_id)
    }

    /// Looks up the registered type of `event`.
    pub(crate) fn registered_type(&self, event: &AnyEvent) -> Result<EventType, DomainError> {
        self.registry.get(event.event_type_id()).ok_or_else(|| {
            DomainError::invalid_argument(
                "event",
                format!("Event type {} is not registered", event.name()),
            )
        })
    }

    /// Persists `event` to every matching outbox.
    ///
    /// Returns the number of outboxes written. Zero means no outbox
    /// selects this type.
    pub async fn persist_to_outboxes(
        &self,
        event: &AnyEvent,
        event_type: &EventType,
    ) -> Result<usize, DomainError> {
        let matching = self.outboxes.matching(event_type);
        if matching.is_empty() {
            return Ok(0);
        }

        let payload = self.serializer.serialize(event)?;
        let identifier = self.serializer.type_identifier(event_type);
        let correlation_id = event.context().correlation_id.clone();

        let mut written = 0;
        for config in &matching {
            let store = match self.outbox_stores.resolve(config) {
                Ok(store) => store,
                Err(e) => {
                    tracing::warn!(outbox = %config.name, error = %e, "Outbox store unavailable");
                    continue;
                }
            };
            let envelope = OutgoingEventInfo::new(identifier.clone(), payload.clone())
                .with_correlation_id(correlation_id.clone());
            tracing::debug!(outbox = %config.name, record_id = %envelope.id, event = event.name(), "Persisting event to outbox");
            store.add(envelope).await?;
            written += 1;
        }

        if written == 0 {
            return Err(DomainError::new(
                ErrorCode::ConfigurationError,
                format!(
                    "No store could be resolved for the {} outbox(es) selecting {}",
                    matching.len(),
                    event.name()
                ),
            ));
        }
        Ok(written)
    }

    /// Delivers `event` to every local handler for its type or an ancestor.
    pub async fn dispatch(&self, event: AnyEvent) -> Result<(), DomainError> {
        let snapshot = self.subscriptions.snapshot();
        let mut seen = HashSet::new();
        let mut calls: Vec<(HandlerEntry, AnyEvent)> = Vec::new();

        let mut collect = |entries: Option<&Arc<Vec<HandlerEntry>>>, view: &AnyEvent| {
            for entry in entries.into_iter().flat_map(|list| list.iter()) {
                if seen.insert(entry.identity()) {
                    calls.push((entry.clone(), view.clone()));
                }
            }
        };

        collect(snapshot.get(&event.event_type_id()), &event);
        if let Some(info) = self.registry.get(event.event_type_id()) {
            for ancestor in info.ancestors() {
                let Some(entries) = snapshot.get(&ancestor.type_id()) else {
                    continue;
                };
                match ancestor.upcast(&event) {
                    Some(view) => collect(Some(entries), &view),
                    None => tracing::warn!(
                        event = event.name(),
                        ancestor = ancestor.name(),
                        "Upcast failed; skipping ancestor handlers"
                    ),
                }
            }
        }

        match calls.len() {
            0 => {
                tracing::debug!(event = event.name(), "No handlers subscribed");
                Ok(())
            }
            1 => {
                let (entry, view) = calls.remove(0);
                entry.invoke(view).await.map_err(|e| handler_failure(&[(entry.name(), e)]))
            }
            _ => {
                let results = join_all(calls.iter().map(|(entry, view)| async move {
                    (entry.name(), entry.invoke(view.clone()).await)
                }))
                .await;
                let failures: Vec<(&'static str, DomainError)> = results
                    .into_iter()
                    .filter_map(|(name, result)| result.err().map(|e| (name, e)))
                    .collect();
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(handler_failure(&failures))
                }
            }
        }
    }

    fn decode(
        &self,
        event_name: &str,
        data: &[u8],
        context: EventContext,
    ) -> Result<Option<AnyEvent>, DomainError> {
        let Some(event_type) = self.serializer.resolve_type(event_name) else {
            return Ok(None);
        };
        let event = self.serializer.deserialize(data, &event_type).ok_or_else(|| {
            DomainError::new(
                ErrorCode::SerializationFailed,
                format!("Payload could not be decoded as {}", event_name),
            )
        })?;
        Ok(Some(event.with_context(context)))
    }
}

fn handler_failure(failures: &[(&'static str, DomainError)]) -> DomainError {
    let summary = failures
        .iter()
        .map(|(name, e)| format!("{}: {}", name, e))
        .collect::<Vec<_>>()
        .join(", ");
    let mut error = DomainError::new(
        ErrorCode::HandlerFailed,
        format!("Handler errors: {}", summary),
    );
    if let Some((name, _)) = failures.first() {
        error = error.with_detail("first_handler", *name);
    }
    error.with_detail("failed_handlers", failures.len().to_string())
}

#[async_trait]
impl SupportsEventBoxes for LocalEventBus {
    async fn publish_from_outbox(
        &self,
        event: &OutgoingEventInfo,
        _config: &OutboxConfig,
    ) -> Result<(), DomainError> {
        let context = EventContext::from_source(EventSource::Outbox)
            .with_message_id(event.id.to_string())
            .with_correlation_id(event.correlation_id.clone());
        match self.decode(&event.event_name, &event.event_data, context)? {
            Some(decoded) => self.dispatch(decoded).await,
            None => Ok(()),
        }
    }

    async fn process_from_inbox(
        &self,
        event: &IncomingEventInfo,
        _config: &InboxConfig,
    ) -> Result<(), DomainError> {
        let context = EventContext::from_source(EventSource::Inbox)
            .with_message_id(event.message_id.clone())
            .with_correlation_id(event.correlation_id.clone());
        match self.decode(&event.event_name, &event.event_data, context)? {
            Some(decoded) => self.dispatch(decoded).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DistributedEventBus for LocalEventBus {
    fn event_types(&self) -> &EventTypeRegistry {
        &self.registry
    }

    async fn publish_event(&self, event: AnyEvent, use_outbox: bool) -> Result<(), DomainError> {
        let event_type = self.registered_type(&event)?;
        if use_outbox && self.persist_to_outboxes(&event, &event_type).await? > 0 {
            return Ok(());
        }
        self.dispatch(event).await
    }

    async fn subscribe_handler(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription, DomainError> {
        let handler_name = handler.name();
        let id = self.subscriptions.add(event_type.type_id(), handler);
        tracing::debug!(event = event_type.name(), handler = handler_name, "Handler subscribed");
        Ok(Subscription::new(
            event_type.name(),
            handler_name,
            Box::new(LocalUnsubscribe::new(
                &self.subscriptions,
                event_type.type_id(),
                id,
            )),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::JsonEventSerializer;
    use crate::adapters::memory::InMemoryEventOutbox;
    use crate::domain::boxes::DEFAULT_BOX_NAME;
    use crate::domain::foundation::Event;
    use crate::ports::{DistributedEventHandler, EventBusExt};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AccountEvent {
        account_id: String,
    }
    crate::distributed_event!(AccountEvent, name = "accounts.account_event");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AccountOpened {
        account_id: String,
        owner: String,
    }
    crate::distributed_event!(AccountOpened, name = "accounts.account_opened");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AccountClosed {
        account_id: String,
    }
    crate::distributed_event!(AccountClosed, name = "accounts.account_closed");

    /// Test handler that counts invocations and records what it saw.
    struct Recorder<E> {
        calls: AtomicUsize,
        seen: StdMutex<Vec<Arc<E>>>,
        fail: bool,
    }

    impl<E> Recorder<E> {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: StdMutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: StdMutex::new(Vec::new()),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<E: Event> DistributedEventHandler<E> for Recorder<E> {
        async fn handle_event(&self, event: Arc<E>) -> Result<(), DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(event);
            if self.fail {
                return Err(DomainError::new(ErrorCode::InternalError, "recorder failure"));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            if self.fail {
                "FailingRecorder"
            } else {
                "Recorder"
            }
        }
    }

    fn bus() -> LocalEventBus {
        let registry = Arc::new(EventTypeRegistry::new());
        registry.register::<AccountEvent>();
        registry.register_derived::<AccountOpened, AccountEvent>(|e| AccountEvent {
            account_id: e.account_id.clone(),
        });
        registry.register::<AccountClosed>();
        let serializer = Arc::new(JsonEventSerializer::new(registry.clone()));
        LocalEventBus::new(registry, serializer)
    }

    fn bus_with_outbox(outbox: Arc<InMemoryEventOutbox>) -> LocalEventBus {
        let configs = Arc::new(OutboxConfigs::new());
        configs.configure(DEFAULT_BOX_NAME, |c| c.select_assignable_to::<AccountEvent>());
        let stores = Arc::new(StoreResolver::<dyn EventOutbox>::new().with_binding("memory", outbox));
        bus().with_outboxes(configs, stores)
    }

    fn opened() -> AccountOpened {
        AccountOpened {
            account_id: "acc-1".to_string(),
            owner: "Ada".to_string(),
        }
    }

    #[tokio::test]
    async fn direct_publish_reaches_exact_and_ancestor_handlers() {
        let bus = bus();
        let exact = Recorder::<AccountOpened>::new();
        let base = Recorder::<AccountEvent>::new();
        let _a = bus.subscribe::<AccountOpened, _>(exact.clone()).await.unwrap();
        let _b = bus.subscribe::<AccountEvent, _>(base.clone()).await.unwrap();

        bus.publish(opened(), false).await.unwrap();

        assert_eq!(exact.calls(), 1);
        assert_eq!(base.calls(), 1);
        assert_eq!(
            base.seen.lock().unwrap()[0].as_ref(),
            &AccountEvent {
                account_id: "acc-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn ancestor_publish_does_not_reach_descendant_handlers() {
        let bus = bus();
        let exact = Recorder::<AccountOpened>::new();
        let _s = bus.subscribe::<AccountOpened, _>(exact.clone()).await.unwrap();

        bus.publish(
            AccountEvent {
                account_id: "acc-2".to_string(),
            },
            false,
        )
        .await
        .unwrap();

        assert_eq!(exact.calls(), 0);
    }

    #[tokio::test]
    async fn double_subscribed_handler_fires_once() {
        let bus = bus();
        let handler = Recorder::<AccountOpened>::new();
        let _a = bus.subscribe::<AccountOpened, _>(handler.clone()).await.unwrap();
        let _b = bus.subscribe::<AccountOpened, _>(handler.clone()).await.unwrap();

        bus.publish(opened(), false).await.unwrap();

        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn unsubscribed_handler_is_not_invoked() {
        let bus = bus();
        let gone = Recorder::<AccountOpened>::new();
        let kept = Recorder::<AccountOpened>::new();
        let s1 = bus.subscribe::<AccountOpened, _>(gone.clone()).await.unwrap();
        let _s2 = bus.subscribe::<AccountOpened, _>(kept.clone()).await.unwrap();

        s1.unsubscribe().await;
        s1.unsubscribe().await;
        bus.publish(opened(), false).await.unwrap();

        assert_eq!(gone.calls(), 0);
        assert_eq!(kept.calls(), 1);
        assert_eq!(bus.handler_count(TypeId::of::<AccountOpened>()), 1);
    }

    #[tokio::test]
    async fn failing_handler_does_not_suppress_siblings() {
        let bus = bus();
        let failing = Recorder::<AccountOpened>::failing();
        let healthy = Recorder::<AccountOpened>::new();
        let _a = bus.subscribe::<AccountOpened, _>(failing.clone()).await.unwrap();
        let _b = bus.subscribe::<AccountOpened, _>(healthy.clone()).await.unwrap();

        let err = bus.publish(opened(), false).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::HandlerFailed);
        assert!(err.message.contains("FailingRecorder"));
        assert_eq!(
            err.details.get("first_handler"),
            Some(&"FailingRecorder".to_string())
        );
        assert_eq!(healthy.calls(), 1);
    }

    #[tokio::test]
    async fn publishing_unregistered_type_is_invalid_argument() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Stray {
            id: u8,
        }
        crate::distributed_event!(Stray, name = "misc.stray");

        let outbox = Arc::new(InMemoryEventOutbox::new());
        let bus = bus_with_outbox(outbox.clone());

        let err = bus
            .publish_event(AnyEvent::new(Stray { id: 1 }), true)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(outbox.len().await, 0);
    }

    #[tokio::test]
    async fn durable_publish_persists_without_dispatching() {
        let outbox = Arc::new(InMemoryEventOutbox::new());
        let bus = bus_with_outbox(outbox.clone());
        let handler = Recorder::<AccountOpened>::new();
        let _s = bus.subscribe::<AccountOpened, _>(handler.clone()).await.unwrap();

        bus.publish_event(AnyEvent::new(opened()).with_correlation_id("corr-1"), true)
            .await
            .unwrap();

        let records = outbox.records().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_pending());
        assert_eq!(records[0].event.event_name, "accounts.account_opened:v1");
        assert_eq!(records[0].event.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn durable_publish_without_matching_outbox_dispatches_immediately() {
        let outbox = Arc::new(InMemoryEventOutbox::new());
        let bus = bus_with_outbox(outbox.clone());
        let handler = Recorder::<AccountClosed>::new();
        let _s = bus.subscribe::<AccountClosed, _>(handler.clone()).await.unwrap();

        bus.publish(
            AccountClosed {
                account_id: "acc-3".to_string(),
            },
            true,
        )
        .await
        .unwrap();

        assert_eq!(outbox.len().await, 0);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn durable_publish_fans_out_to_every_matching_outbox() {
        let first = Arc::new(InMemoryEventOutbox::new());
        let second = Arc::new(InMemoryEventOutbox::new());
        let configs = Arc::new(OutboxConfigs::new());
        configs.configure("first", |c| c.with_implementation("first"));
        configs.configure("second", |c| c.with_implementation("second"));
        let stores = Arc::new(
            StoreResolver::<dyn EventOutbox>::new()
                .with_binding("first", first.clone())
                .with_binding("second", second.clone()),
        );
        let bus = bus().with_outboxes(configs, stores);

        bus.publish(opened(), true).await.unwrap();

        assert_eq!(first.len().await, 1);
        assert_eq!(second.len().await, 1);
        assert_ne!(
            first.records().await[0].id(),
            second.records().await[0].id()
        );
    }

    #[tokio::test]
    async fn durable_publish_with_unresolvable_store_is_configuration_error() {
        let configs = Arc::new(OutboxConfigs::new());
        configs.configure(DEFAULT_BOX_NAME, |c| c.with_implementation("missing"));
        let bus = bus().with_outboxes(configs, Arc::new(StoreResolver::new()));

        let err = bus.publish(opened(), true).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigurationError);
    }

    #[tokio::test]
    async fn publish_from_outbox_dispatches_with_outbox_context() {
        let outbox = Arc::new(InMemoryEventOutbox::new());
        let bus = Arc::new(bus_with_outbox(outbox.clone()));
        let contexts = Arc::new(StdMutex::new(Vec::new()));
        let sink = contexts.clone();
        let _s = bus
            .subscribe_handler(
                bus.registry().register::<AccountOpened>(),
                Arc::new(ContextSink { sink }),
            )
            .await
            .unwrap();

        bus.publish(opened(), true).await.unwrap();
        let record = outbox.records().await.remove(0);
        bus.publish_from_outbox(&record.event, &OutboxConfig::new(DEFAULT_BOX_NAME))
            .await
            .unwrap();

        let contexts = contexts.lock().unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].source, EventSource::Outbox);
        assert_eq!(contexts[0].message_id, Some(record.id().to_string()));
    }

    #[tokio::test]
    async fn publish_from_outbox_with_unknown_type_is_a_no_op() {
        let bus = bus();
        let envelope = OutgoingEventInfo::new("accounts.unknown:v1", b"{}".to_vec());

        bus.publish_from_outbox(&envelope, &OutboxConfig::new(DEFAULT_BOX_NAME))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_from_outbox_with_bad_payload_fails() {
        let bus = bus();
        let envelope = OutgoingEventInfo::new("accounts.account_opened:v1", b"[1,2]".to_vec());

        let err = bus
            .publish_from_outbox(&envelope, &OutboxConfig::new(DEFAULT_BOX_NAME))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SerializationFailed);
    }

    #[tokio::test]
    async fn process_from_inbox_uses_broker_message_id() {
        let bus = bus();
        let contexts = Arc::new(StdMutex::new(Vec::new()));
        let _s = bus
            .subscribe_handler(
                bus.registry().register::<AccountClosed>(),
                Arc::new(ContextSink {
                    sink: contexts.clone(),
                }),
            )
            .await
            .unwrap();

        let incoming = IncomingEventInfo::new(
            "broker-msg-1",
            "accounts.account_closed:v1",
            br#"{"account_id":"acc-9"}"#.to_vec(),
        );
        bus.process_from_inbox(&incoming, &InboxConfig::new(DEFAULT_BOX_NAME))
            .await
            .unwrap();

        let contexts = contexts.lock().unwrap();
        assert_eq!(contexts[0].source, EventSource::Inbox);
        assert_eq!(contexts[0].message_id.as_deref(), Some("broker-msg-1"));
    }

    #[tokio::test]
    async fn non_reentrant_handler_is_never_run_concurrently() {
        let bus = Arc::new(bus());
        let tracker = Arc::new(OverlapTracker::default());
        let _s = bus
            .subscribe_handler(bus.registry().register::<AccountClosed>(), tracker.clone())
            .await
            .unwrap();

        let publishes = (0..4).map(|i| {
            let bus = bus.clone();
            async move {
                bus.publish(
                    AccountClosed {
                        account_id: format!("acc-{}", i),
                    },
                    false,
                )
                .await
            }
        });
        for result in join_all(publishes).await {
            result.unwrap();
        }

        assert_eq!(tracker.calls.load(Ordering::SeqCst), 4);
        assert_eq!(tracker.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_subscribed_for_base_and_derived_is_serialized() {
        let bus = Arc::new(bus());
        let tracker = Arc::new(OverlapTracker::default());
        let _base = bus
            .subscribe_handler(bus.registry().register::<AccountEvent>(), tracker.clone())
            .await
            .unwrap();
        let _derived = bus
            .subscribe_handler(bus.registry().get_of::<AccountOpened>().unwrap(), tracker.clone())
            .await
            .unwrap();

        let (base, derived) = tokio::join!(
            bus.publish(
                AccountEvent {
                    account_id: "acc-3".to_string(),
                },
                false,
            ),
            bus.publish(opened(), false),
        );
        base.unwrap();
        derived.unwrap();

        assert_eq!(tracker.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.max_active.load(Ordering::SeqCst), 1);
    }

    struct ContextSink {
        sink: Arc<StdMutex<Vec<EventContext>>>,
    }

    #[async_trait]
    impl EventHandler for ContextSink {
        async fn handle(&self, event: AnyEvent) -> Result<(), DomainError> {
            self.sink.lock().unwrap().push(event.context().clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "ContextSink"
        }
    }

    #[derive(Default)]
    struct OverlapTracker {
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for OverlapTracker {
        async fn handle(&self, _event: AnyEvent) -> Result<(), DomainError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "OverlapTracker"
        }
    }

    #[tokio::test]
    async fn handler_table_subscribes_bindings_except_excluded() {
        let bus = bus();
        let opened_handler = Recorder::<AccountOpened>::new();
        let closed_handler = Recorder::<AccountClosed>::failing();
        let table = crate::ports::HandlerTable::new()
            .bind::<AccountOpened, _>(bus.registry(), opened_handler.clone())
            .bind::<AccountClosed, _>(bus.registry(), closed_handler.clone())
            .exclude("FailingRecorder");
        assert_eq!(table.len(), 2);

        let subscriptions = table.subscribe_all(&bus).await.unwrap();
        bus.publish(opened(), false).await.unwrap();
        bus.publish(
            AccountClosed {
                account_id: "acc-1".to_string(),
            },
            false,
        )
        .await
        .unwrap();

        assert_eq!(subscriptions.len(), 1);
        assert_eq!(opened_handler.calls(), 1);
        assert_eq!(closed_handler.calls(), 0);
    }
}
