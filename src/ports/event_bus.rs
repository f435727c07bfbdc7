//! Event bus ports - Publishing, subscribing and box integration.
//!
//! `DistributedEventBus` is the object-safe core every bus implements.
//! `EventBusExt` layers the typed `publish::<E>` / `subscribe::<E, _>`
//! helpers on top of it for any bus, including `dyn DistributedEventBus`.

use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::event_handler::{handler_fn, DistributedEventHandler, EventHandler, TypedHandler};
use super::event_inbox::InboxConfig;
use super::event_outbox::OutboxConfig;
use crate::domain::boxes::{IncomingEventInfo, OutgoingEventInfo};
use crate::domain::foundation::{
    AnyEvent, DomainError, ErrorCode, Event, EventType, EventTypeRegistry,
};

/// Entry points used by outbox senders and inbox processors.
///
/// Neither path ever writes to an outbox again.
#[async_trait]
pub trait SupportsEventBoxes: Send + Sync {
    /// Deliver a record drained from an outbox.
    ///
    /// A type identifier that does not resolve is a silent no-op; the
    /// caller owns marking the record.
    async fn publish_from_outbox(
        &self,
        event: &OutgoingEventInfo,
        config: &OutboxConfig,
    ) -> Result<(), DomainError>;

    /// Deliver several outbox records concurrently.
    ///
    /// Every record is attempted; the first failure is returned.
    async fn publish_many_from_outbox(
        &self,
        events: &[OutgoingEventInfo],
        config: &OutboxConfig,
    ) -> Result<(), DomainError> {
        let results = join_all(
            events
                .iter()
                .map(|event| self.publish_from_outbox(event, config)),
        )
        .await;
        results.into_iter().collect()
    }

    /// Dispatch a record drained from an inbox to local handlers.
    async fn process_from_inbox(
        &self,
        event: &IncomingEventInfo,
        config: &InboxConfig,
    ) -> Result<(), DomainError>;
}

/// Object-safe publish/subscribe contract.
#[async_trait]
pub trait DistributedEventBus: SupportsEventBoxes {
    /// Types known to this bus.
    fn event_types(&self) -> &EventTypeRegistry;

    /// Publish an erased event.
    ///
    /// Fails with `INVALID_ARGUMENT` before any I/O if the event's type is
    /// not registered.
    async fn publish_event(&self, event: AnyEvent, use_outbox: bool) -> Result<(), DomainError>;

    /// Register `handler` for `event_type` and its descendants.
    async fn subscribe_handler(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription, DomainError>;
}

/// Typed helpers over any `DistributedEventBus`.
#[async_trait]
pub trait EventBusExt: DistributedEventBus {
    /// Publish a typed event, registering its type on first use.
    async fn publish<E: Event>(&self, event: E, use_outbox: bool) -> Result<(), DomainError> {
        self.event_types().register::<E>();
        self.publish_event(AnyEvent::new(event), use_outbox).await
    }

    /// Subscribe a typed handler for `E`.
    async fn subscribe<E, H>(&self, handler: Arc<H>) -> Result<Subscription, DomainError>
    where
        E: Event,
        H: DistributedEventHandler<E> + 'static,
    {
        let event_type = self.event_types().register::<E>();
        self.subscribe_handler(event_type, Arc::new(TypedHandler::<E, H>::new(handler)))
            .await
    }

    /// Subscribe an async closure for `E`.
    async fn subscribe_fn<E, F, Fut>(
        &self,
        name: &'static str,
        handler: F,
    ) -> Result<Subscription, DomainError>
    where
        E: Event,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
    {
        let event_type = self.event_types().register::<E>();
        self.subscribe_handler(event_type, handler_fn::<E, F, Fut>(name, handler))
            .await
    }
}

impl<T: DistributedEventBus + ?Sized> EventBusExt for T {}

/// Removes what a subscription registered.
#[async_trait]
pub trait Unsubscribe: Send {
    async fn unsubscribe(&mut self);
}

/// Handle to one registered handler.
///
/// Dropping the handle leaves the handler registered.
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    event_name: &'static str,
    handler_name: &'static str,
    guard: Mutex<Option<Box<dyn Unsubscribe>>>,
}

impl Subscription {
    pub fn new(
        event_name: &'static str,
        handler_name: &'static str,
        guard: Box<dyn Unsubscribe>,
    ) -> Self {
        Self {
            event_name,
            handler_name,
            guard: Mutex::new(Some(guard)),
        }
    }

    pub fn event_name(&self) -> &'static str {
        self.event_name
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    /// Removes exactly this subscription's handler.
    ///
    /// Safe to call more than once; later calls wait for the first to
    /// finish and then do nothing.
    pub async fn unsubscribe(&self) {
        let mut guard = self.guard.lock().await;
        if let Some(mut active) = guard.take() {
            active.unsubscribe().await;
        }
    }

    pub async fn is_active(&self) -> bool {
        self.guard.lock().await.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_name", &self.event_name)
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

/// Explicit (event type → handler) bindings built by the host at startup.
#[derive(Default)]
pub struct HandlerTable {
    bindings: Vec<(EventType, Arc<dyn EventHandler>)>,
    excluded: Vec<&'static str>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a typed handler for `E`.
    pub fn bind<E, H>(mut self, registry: &EventTypeRegistry, handler: Arc<H>) -> Self
    where
        E: Event,
        H: DistributedEventHandler<E> + 'static,
    {
        let event_type = registry.register::<E>();
        self.bindings
            .push((event_type, Arc::new(TypedHandler::<E, H>::new(handler))));
        self
    }

    /// Binds an erased handler for an already registered type.
    pub fn bind_erased(mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Self {
        self.bindings.push((event_type, handler));
        self
    }

    /// Skips every binding whose handler has this name.
    pub fn exclude(mut self, handler_name: &'static str) -> Self {
        self.excluded.push(handler_name);
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Subscribes every non-excluded binding, in binding order.
    ///
    /// On failure, subscriptions made so far are removed again.
    pub async fn subscribe_all(
        self,
        bus: &dyn DistributedEventBus,
    ) -> Result<Vec<Subscription>, DomainError> {
        let mut subscriptions = Vec::with_capacity(self.bindings.len());
        for (event_type, handler) in self.bindings {
            if self.excluded.contains(&handler.name()) {
                tracing::debug!(handler = handler.name(), "Skipping excluded handler");
                continue;
            }
            match bus.subscribe_handler(event_type, handler).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    for subscription in &subscriptions {
                        subscription.unsubscribe().await;
                    }
                    return Err(DomainError::new(
                        ErrorCode::ConfigurationError,
                        format!("Failed to subscribe handler table: {}", e),
                    ));
                }
            }
        }
        Ok(subscriptions)
    }
}
