//! Receive loop for one broker-backed subscription.
//!
//! For each locked message:
//!
//! 1. Resolve its type from the `EventType` property, falling back to the label
//! 2. Unresolvable: abandon (the broker redelivers or dead-letters)
//! 3. Not assignable to the subscribed type: release it for another loop on
//!    the endpoint, or complete it if no active loop accepts the type
//! 4. A matching inbox exists: persist there, then complete
//! 5. Otherwise decode and dispatch locally; complete on success, abandon on error

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::adapters::events::{wait_or_shutdown, LocalEventBus, WorkerLifecycle, WorkerState};
use crate::domain::boxes::IncomingEventInfo;
use crate::domain::foundation::{
    DomainError, ErrorCode, EventContext, EventSource, EventType, EventTypeRegistry,
};
use crate::ports::{BrokerClient, ReceivedMessage, EVENT_TYPE_PROPERTY};

use super::event_bus::InboxRouting;

/// Where the loop receives from and how.
#[derive(Debug, Clone)]
pub(crate) struct ReceiveSettings {
    pub entity_path: String,
    pub subscription: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub error_backoff: Duration,
}

/// Pause after releasing messages so another loop can lock them.
const RELEASE_PAUSE: Duration = Duration::from_millis(20);

/// Subscribed types with a running loop on one endpoint.
#[derive(Default)]
pub(crate) struct ActiveTargets {
    counts: Mutex<HashMap<TypeId, usize>>,
}

impl ActiveTargets {
    pub fn add(&self, target: TypeId) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        *counts.entry(target).or_insert(0) += 1;
    }

    pub fn remove(&self, target: TypeId) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counts.get_mut(&target) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&target);
            }
        }
    }

    /// Whether any running loop accepts events of type `from`.
    pub fn any_accepts(&self, registry: &EventTypeRegistry, from: TypeId) -> bool {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.keys().any(|target| registry.is_assignable(from, *target))
    }
}

enum Settlement {
    Complete,
    Abandon,
    Release,
}

pub(crate) struct SubscriptionProcessor {
    local: Arc<LocalEventBus>,
    client: Arc<dyn BrokerClient>,
    settings: ReceiveSettings,
    target: EventType,
    inboxes: Option<InboxRouting>,
    active: Arc<ActiveTargets>,
    lifecycle: WorkerLifecycle,
}

impl SubscriptionProcessor {
    pub fn new(
        local: Arc<LocalEventBus>,
        client: Arc<dyn BrokerClient>,
        settings: ReceiveSettings,
        target: EventType,
        inboxes: Option<InboxRouting>,
        active: Arc<ActiveTargets>,
    ) -> Self {
        let lifecycle = WorkerLifecycle::new(format!(
            "broker-processor:{}:{}",
            settings.subscription,
            target.name()
        ));
        Self {
            local,
            client,
            settings,
            target,
            inboxes,
            active,
            lifecycle,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub async fn start(self: &Arc<Self>) -> WorkerState {
        let processor = Arc::clone(self);
        if self
            .lifecycle
            .launch(move |shutdown| processor.run(shutdown))
            .await
        {
            self.active.add(self.target.type_id());
        }
        self.state()
    }

    /// Stops receiving and waits for the in-flight batch to settle.
    pub async fn stop(&self) {
        if self.state() == WorkerState::Running {
            self.active.remove(self.target.type_id());
        }
        self.lifecycle.shutdown().await;
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let settings = &self.settings;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.client.receive(
                    &settings.entity_path,
                    &settings.subscription,
                    settings.batch_size,
                    settings.max_wait,
                ) => received,
            };

            match received {
                Ok(messages) => {
                    let mut pause = Duration::ZERO;
                    for message in messages {
                        pause = match self.process(message).await {
                            Settlement::Abandon => settings.error_backoff,
                            Settlement::Release => pause.max(RELEASE_PAUSE),
                            Settlement::Complete => pause,
                        };
                    }
                    // Unsettled messages go straight back to the queue.
                    if !pause.is_zero() && wait_or_shutdown(&mut shutdown, pause).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        subscription = %settings.subscription,
                        error = %e,
                        "Broker receive failed"
                    );
                    if wait_or_shutdown(&mut shutdown, settings.error_backoff).await {
                        break;
                    }
                }
            }
        }
    }

    async fn process(&self, message: ReceivedMessage) -> Settlement {
        let settlement = self.settle(&message).await;
        let settings = &self.settings;
        let result = match &settlement {
            Settlement::Complete => {
                self.client
                    .complete(&settings.entity_path, &settings.subscription, &message.lock_token)
                    .await
            }
            Settlement::Abandon => {
                self.client
                    .abandon(&settings.entity_path, &settings.subscription, &message.lock_token)
                    .await
            }
            Settlement::Release => {
                self.client
                    .release(&settings.entity_path, &settings.subscription, &message.lock_token)
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!(message_id = %message.message_id, error = %e, "Failed to settle broker message");
        }
        settlement
    }

    fn resolve(&self, message: &ReceivedMessage) -> Option<EventType> {
        let serializer = self.local.serializer();
        message
            .property(EVENT_TYPE_PROPERTY)
            .and_then(|token| serializer.resolve_type(token))
            .or_else(|| self.local.registry().find_by_name(&message.label))
    }

    async fn settle(&self, message: &ReceivedMessage) -> Settlement {
        let Some(event_type) = self.resolve(message) else {
            tracing::warn!(message_id = %message.message_id, label = %message.label, "Unknown event type; abandoning message");
            return Settlement::Abandon;
        };
        let registry = self.local.registry();
        if !registry.is_assignable(event_type.type_id(), self.target.type_id()) {
            if self.active.any_accepts(registry, event_type.type_id()) {
                return Settlement::Release;
            }
            tracing::debug!(message_id = %message.message_id, event = event_type.name(), "No local subscriber for event type; completing");
            return Settlement::Complete;
        }

        let outcome = match &self.inboxes {
            Some(routing) if !routing.configs.matching(&event_type).is_empty() => {
                self.persist_to_inboxes(routing, &event_type, message).await
            }
            _ => self.dispatch(&event_type, message).await,
        };
        match outcome {
            Ok(()) => Settlement::Complete,
            Err(e) => {
                tracing::warn!(
                    message_id = %message.message_id,
                    event = event_type.name(),
                    delivery_count = message.delivery_count,
                    error = %e,
                    "Broker message not handled; abandoning"
                );
                Settlement::Abandon
            }
        }
    }

    async fn persist_to_inboxes(
        &self,
        routing: &InboxRouting,
        event_type: &EventType,
        message: &ReceivedMessage,
    ) -> Result<(), DomainError> {
        let identifier = self.local.serializer().type_identifier(event_type);
        for config in routing.configs.matching(event_type) {
            let store = routing.stores.resolve(&config)?;
            let envelope = IncomingEventInfo::new(
                message.message_id.clone(),
                identifier.clone(),
                message.body.clone(),
            )
            .with_correlation_id(message.correlation_id.clone());
            if !store.add(envelope).await? {
                tracing::debug!(inbox = %config.name, message_id = %message.message_id, "Duplicate delivery already in inbox");
            }
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        event_type: &EventType,
        message: &ReceivedMessage,
    ) -> Result<(), DomainError> {
        let event = self
            .local
            .serializer()
            .deserialize(&message.body, event_type)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SerializationFailed,
                    format!("Payload could not be decoded as {}", event_type.identifier()),
                )
            })?;
        let context = EventContext::from_source(EventSource::Broker)
            .with_message_id(message.message_id.clone())
            .with_correlation_id(message.correlation_id.clone());
        self.local.dispatch(event.with_context(context)).await
    }
}
