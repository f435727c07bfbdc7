//! BrokerEventBus - The bus contract over a topic/subscription broker.
//!
//! Publishing sends one message per event: the body is the serialized
//! payload, the label is the event name and the `EventType` property carries
//! the precise identifier. Durable publishes go through the local bus's
//! outboxes first and reach the broker when the outbox sender drains them,
//! keeping the outbox record id as the broker message id.
//!
//! Subscribing provisions a type rule on this endpoint's subscription and
//! starts a receive loop for the subscribed type.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::events::{LocalEventBus, StoreResolver};
use crate::config::BrokerConfig;
use crate::domain::boxes::{IncomingEventInfo, OutgoingEventInfo};
use crate::domain::foundation::{
    AnyEvent, DomainError, ErrorCode, EventType, EventTypeInfo, EventTypeRegistry,
};
use crate::ports::{
    BrokerClient, DistributedEventBus, EventHandler, EventInbox, InboxConfig, InboxConfigs,
    OutboxConfig, OutgoingMessage, Subscription, SupportsEventBoxes, Unsubscribe,
    EVENT_TYPE_PROPERTY,
};

use super::processor::{ActiveTargets, ReceiveSettings, SubscriptionProcessor};
use super::routing::RuleProvisioner;

/// Inboxes that broker deliveries are staged in.
#[derive(Clone)]
pub(crate) struct InboxRouting {
    pub configs: Arc<InboxConfigs>,
    pub stores: Arc<StoreResolver<dyn EventInbox>>,
}

pub struct BrokerEventBus {
    local: Arc<LocalEventBus>,
    client: Arc<dyn BrokerClient>,
    config: BrokerConfig,
    inboxes: Option<InboxRouting>,
    active: Arc<ActiveTargets>,
}

impl BrokerEventBus {
    /// Validates `config` and prepares the endpoint's subscription.
    ///
    /// # Errors
    ///
    /// `CONFIGURATION_ERROR` when required broker settings are missing.
    pub async fn connect(
        local: Arc<LocalEventBus>,
        client: Arc<dyn BrokerClient>,
        config: BrokerConfig,
    ) -> Result<Self, DomainError> {
        config.validate().map_err(|e| {
            DomainError::new(
                ErrorCode::ConfigurationError,
                format!("Invalid broker configuration: {}", e),
            )
        })?;

        if let Some(subscription) = &config.subscription_name {
            RuleProvisioner::new(client.clone(), &config.entity_path, subscription)
                .remove_default_rule()
                .await;
        }
        tracing::info!(
            entity = %config.entity_path,
            subscription = config.subscription_name.as_deref().unwrap_or("-"),
            "Broker event bus connected"
        );

        Ok(Self {
            local,
            client,
            config,
            inboxes: None,
            active: Arc::new(ActiveTargets::default()),
        })
    }

    /// Stages matching deliveries in `configs`' inboxes instead of invoking
    /// handlers directly.
    pub fn with_inboxes(
        mut self,
        configs: Arc<InboxConfigs>,
        stores: Arc<StoreResolver<dyn EventInbox>>,
    ) -> Self {
        self.inboxes = Some(InboxRouting { configs, stores });
        self
    }

    pub fn local(&self) -> &Arc<LocalEventBus> {
        &self.local
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn message_for(
        &self,
        message_id: String,
        event_type: &EventTypeInfo,
        body: Vec<u8>,
        correlation_id: Option<String>,
    ) -> OutgoingMessage {
        OutgoingMessage::new(message_id, event_type.name(), body)
            .with_property(
                EVENT_TYPE_PROPERTY,
                self.local.serializer().type_identifier(event_type),
            )
            .with_correlation_id(correlation_id)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), DomainError> {
        tracing::debug!(
            entity = %self.config.entity_path,
            message_id = %message.message_id,
            label = %message.label,
            "Sending broker message"
        );
        self.client
            .send(&self.config.entity_path, message)
            .await
            .map_err(DomainError::from)
    }
}

#[async_trait]
impl SupportsEventBoxes for BrokerEventBus {
    async fn publish_from_outbox(
        &self,
        event: &OutgoingEventInfo,
        _config: &OutboxConfig,
    ) -> Result<(), DomainError> {
        let Some(event_type) = self.local.serializer().resolve_type(&event.event_name) else {
            return Ok(());
        };
        let message = self.message_for(
            event.id.to_string(),
            &event_type,
            event.event_data.clone(),
            event.correlation_id.clone(),
        );
        self.send(message).await
    }

    async fn process_from_inbox(
        &self,
        event: &IncomingEventInfo,
        config: &InboxConfig,
    ) -> Result<(), DomainError> {
        self.local.process_from_inbox(event, config).await
    }
}

#[async_trait]
impl DistributedEventBus for BrokerEventBus {
    fn event_types(&self) -> &EventTypeRegistry {
        self.local.registry()
    }

    async fn publish_event(&self, event: AnyEvent, use_outbox: bool) -> Result<(), DomainError> {
        let event_type = self.local.registered_type(&event)?;
        if use_outbox && self.local.persist_to_outboxes(&event, &event_type).await? > 0 {
            return Ok(());
        }

        let body = self.local.serializer().serialize(&event)?;
        let message_id = event
            .context()
            .message_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let message = self.message_for(
            message_id,
            &event_type,
            body,
            event.context().correlation_id.clone(),
        );
        self.send(message).await
    }

    async fn subscribe_handler(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription, DomainError> {
        let subscription = self.config.subscription_name.clone().ok_or_else(|| {
            DomainError::new(
                ErrorCode::ConfigurationError,
                "A subscription name is required to subscribe through the broker",
            )
        })?;

        let provisioner =
            RuleProvisioner::new(self.client.clone(), &self.config.entity_path, &subscription);
        provisioner.remove_default_rule().await;
        provisioner.ensure_type_rule(&event_type).await;

        let local_subscription = self
            .local
            .subscribe_handler(event_type.clone(), handler)
            .await?;

        let processor = Arc::new(SubscriptionProcessor::new(
            self.local.clone(),
            self.client.clone(),
            ReceiveSettings {
                entity_path: self.config.entity_path.clone(),
                subscription,
                batch_size: self.config.receive_batch_size,
                max_wait: self.config.max_wait(),
                error_backoff: self.config.error_backoff(),
            },
            event_type.clone(),
            self.inboxes.clone(),
            self.active.clone(),
        ));
        processor.start().await;

        Ok(Subscription::new(
            event_type.name(),
            local_subscription.handler_name(),
            Box::new(BrokerUnsubscribe {
                processor,
                local: Some(local_subscription),
            }),
        ))
    }
}

struct BrokerUnsubscribe {
    processor: Arc<SubscriptionProcessor>,
    local: Option<Subscription>,
}

#[async_trait]
impl Unsubscribe for BrokerUnsubscribe {
    async fn unsubscribe(&mut self) {
        self.processor.stop().await;
        if let Some(local) = self.local.take() {
            local.unsubscribe().await;
        }
    }
}
