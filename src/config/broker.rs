//! Broker transport configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Broker connection and receive-loop settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Broker connection string
    #[serde(default)]
    pub connection_string: String,

    /// Topic that events are published to and received from
    #[serde(default)]
    pub entity_path: String,

    /// Subscription this endpoint receives through; required to subscribe
    #[serde(default)]
    pub subscription_name: Option<String>,

    /// Messages locked per receive call
    #[serde(default = "default_receive_batch_size")]
    pub receive_batch_size: usize,

    /// Upper bound on one receive call
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Pause after a failed receive before trying again
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

impl BrokerConfig {
    pub fn new(connection_string: impl Into<String>, entity_path: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            entity_path: entity_path.into(),
            ..Default::default()
        }
    }

    pub fn with_subscription(mut self, subscription_name: impl Into<String>) -> Self {
        self.subscription_name = Some(subscription_name.into());
        self
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Validate broker configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.connection_string.trim().is_empty() {
            return Err(ValidationError::MissingRequired("BROKER_CONNECTION_STRING"));
        }
        if self.entity_path.trim().is_empty() {
            return Err(ValidationError::MissingRequired("BROKER_ENTITY_PATH"));
        }
        if matches!(&self.subscription_name, Some(name) if name.trim().is_empty()) {
            return Err(ValidationError::MissingRequired("BROKER_SUBSCRIPTION_NAME"));
        }
        if self.receive_batch_size == 0 {
            return Err(ValidationError::MustBePositive("receive_batch_size"));
        }
        if self.max_wait_ms == 0 {
            return Err(ValidationError::MustBePositive("max_wait_ms"));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            entity_path: String::new(),
            subscription_name: None,
            receive_batch_size: default_receive_batch_size(),
            max_wait_ms: default_max_wait_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

fn default_receive_batch_size() -> usize {
    10
}

fn default_max_wait_ms() -> u64 {
    1000
}

fn default_error_backoff_ms() -> u64 {
    1000
}
