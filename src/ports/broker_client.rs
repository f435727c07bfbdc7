//! BrokerClient port - Wire operations against a topic/subscription broker.
//!
//! The broker model is a single topic (entity path) with named
//! subscriptions. Each subscription holds filter rules; a message is copied
//! into every subscription that has at least one matching rule. Receiving
//! locks messages; the consumer then completes, abandons or releases each
//! lock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};

/// Name of the catch-all rule a fresh subscription starts with.
pub const DEFAULT_RULE_NAME: &str = "$Default";

/// Application property carrying the precise type identifier.
pub const EVENT_TYPE_PROPERTY: &str = "EventType";

/// Errors returned by broker operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Rule '{0}' already exists")]
    RuleAlreadyExists(String),

    #[error("Rule '{0}' not found")]
    RuleNotFound(String),

    #[error("Entity '{0}' not found")]
    EntityNotFound(String),

    #[error("Lock '{0}' is not held")]
    LockLost(String),

    #[error("Broker transport error: {0}")]
    Transport(String),
}

impl From<BrokerError> for DomainError {
    fn from(err: BrokerError) -> Self {
        let code = match err {
            BrokerError::EntityNotFound(_) | BrokerError::RuleNotFound(_) => ErrorCode::NotFound,
            _ => ErrorCode::BrokerError,
        };
        DomainError::new(code, err.to_string())
    }
}

/// Message as sent to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub message_id: String,
    /// Human-readable type label.
    pub label: String,
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub properties: HashMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(message_id: impl Into<String>, label: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            label: label.into(),
            body,
            correlation_id: None,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Message received under a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub label: String,
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub properties: HashMap<String, String>,
    pub lock_token: String,
    pub delivery_count: u32,
}

impl ReceivedMessage {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Server-side subscription filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleFilter {
    /// Matches every message.
    True,
    /// Matches messages whose label equals `label` or whose
    /// `EventType` property equals `type_token`.
    EventType { label: String, type_token: String },
}

impl RuleFilter {
    pub fn matches(&self, label: &str, properties: &HashMap<String, String>) -> bool {
        match self {
            RuleFilter::True => true,
            RuleFilter::EventType {
                label: expected,
                type_token,
            } => {
                label == expected
                    || properties
                        .get(EVENT_TYPE_PROPERTY)
                        .map_or(false, |token| token == type_token)
            }
        }
    }
}

/// A named rule on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDescription {
    pub name: String,
    pub filter: RuleFilter,
}

/// Port for broker transport and administration.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Send a message to the topic.
    async fn send(&self, entity_path: &str, message: OutgoingMessage) -> Result<(), BrokerError>;

    /// Lock and return up to `max_messages`, waiting at most `max_wait`.
    ///
    /// Returns an empty batch when the wait elapses.
    async fn receive(
        &self,
        entity_path: &str,
        subscription: &str,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError>;

    /// Acknowledge and remove a locked message.
    async fn complete(
        &self,
        entity_path: &str,
        subscription: &str,
        lock_token: &str,
    ) -> Result<(), BrokerError>;

    /// Give up a locked message; it is redelivered or dead-lettered by the
    /// broker's own policy.
    async fn abandon(
        &self,
        entity_path: &str,
        subscription: &str,
        lock_token: &str,
    ) -> Result<(), BrokerError>;

    /// Unlock a message without counting the delivery attempt.
    async fn release(
        &self,
        entity_path: &str,
        subscription: &str,
        lock_token: &str,
    ) -> Result<(), BrokerError>;

    async fn list_rules(
        &self,
        entity_path: &str,
        subscription: &str,
    ) -> Result<Vec<RuleDescription>, BrokerError>;

    async fn create_rule(
        &self,
        entity_path: &str,
        subscription: &str,
        rule: RuleDescription,
    ) -> Result<(), BrokerError>;

    async fn delete_rule(
        &self,
        entity_path: &str,
        subscription: &str,
        rule_name: &str,
    ) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that the trait is object-safe
    #[allow(dead_code)]
    fn assert_client_object_safe(_: &dyn BrokerClient) {}

    fn properties(token: &str) -> HashMap<String, String> {
        HashMap::from([(EVENT_TYPE_PROPERTY.to_string(), token.to_string())])
    }

    #[test]
    fn true_filter_matches_everything() {
        assert!(RuleFilter::True.matches("anything", &HashMap::new()));
    }

    #[test]
    fn event_type_filter_matches_label_or_token() {
        let filter = RuleFilter::EventType {
            label: "orders.order_placed".to_string(),
            type_token: "orders.order_placed:v1".to_string(),
        };

        assert!(filter.matches("orders.order_placed", &HashMap::new()));
        assert!(filter.matches("renamed", &properties("orders.order_placed:v1")));
        assert!(!filter.matches("orders.order_shipped", &properties("orders.order_shipped:v1")));
    }

    #[test]
    fn broker_errors_map_to_domain_codes() {
        let not_found: DomainError = BrokerError::EntityNotFound("orders".to_string()).into();
        let transport: DomainError = BrokerError::Transport("reset".to_string()).into();

        assert_eq!(not_found.code, ErrorCode::NotFound);
        assert_eq!(transport.code, ErrorCode::BrokerError);
        assert_eq!(transport.message, "Broker transport error: reset");
    }
}
