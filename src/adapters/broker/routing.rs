//! Subscription rule provisioning.
//!
//! Every failure here is logged and swallowed: a subscription that keeps
//! its catch-all rule or lacks a type rule only receives more than it
//! needs, and the processing loop filters by assignability.

use std::sync::Arc;

use crate::domain::foundation::EventTypeInfo;
use crate::ports::{BrokerClient, BrokerError, RuleDescription, RuleFilter, DEFAULT_RULE_NAME};

pub const TYPE_RULE_PREFIX: &str = "Type-";

/// Rule name used for an event label.
pub fn type_rule_name(label: &str) -> String {
    format!("{}{}", TYPE_RULE_PREFIX, label)
}

/// Rule matching messages of `event_type` by label or precise identifier.
pub fn type_rule(event_type: &EventTypeInfo) -> RuleDescription {
    RuleDescription {
        name: type_rule_name(event_type.name()),
        filter: RuleFilter::EventType {
            label: event_type.name().to_string(),
            type_token: event_type.identifier().to_string(),
        },
    }
}

#[derive(Clone)]
pub(crate) struct RuleProvisioner {
    client: Arc<dyn BrokerClient>,
    entity_path: String,
    subscription: String,
}

impl RuleProvisioner {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        entity_path: impl Into<String>,
        subscription: impl Into<String>,
    ) -> Self {
        Self {
            client,
            entity_path: entity_path.into(),
            subscription: subscription.into(),
        }
    }

    /// Removes the catch-all rule if it is still present.
    pub async fn remove_default_rule(&self) {
        match self
            .client
            .delete_rule(&self.entity_path, &self.subscription, DEFAULT_RULE_NAME)
            .await
        {
            Ok(()) => tracing::info!(
                entity = %self.entity_path,
                subscription = %self.subscription,
                "Removed default subscription rule"
            ),
            Err(BrokerError::RuleNotFound(_)) => {}
            Err(e) => tracing::warn!(
                entity = %self.entity_path,
                subscription = %self.subscription,
                error = %e,
                "Could not remove default subscription rule"
            ),
        }
    }

    /// Creates the rule for `event_type` unless it already exists.
    pub async fn ensure_type_rule(&self, event_type: &EventTypeInfo) {
        let rule = type_rule(event_type);
        let rule_name = rule.name.clone();
        match self
            .client
            .create_rule(&self.entity_path, &self.subscription, rule)
            .await
        {
            Ok(()) => tracing::info!(
                subscription = %self.subscription,
                rule = %rule_name,
                "Created subscription rule"
            ),
            Err(BrokerError::RuleAlreadyExists(_)) => {}
            Err(e) => tracing::warn!(
                subscription = %self.subscription,
                rule = %rule_name,
                error = %e,
                "Could not create subscription rule"
            ),
        }
    }
}
