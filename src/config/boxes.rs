//! Outbox/inbox worker configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::events::BoxWorkerOptions;
use crate::domain::boxes::RetryPolicy;
use crate::ports::{InboxConfigs, OutboxConfigs};

/// Polling, retry and retention settings shared by every box
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BoxesConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub outbox_poll_interval_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub inbox_poll_interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub outbox_batch_size: usize,

    #[serde(default = "default_batch_size")]
    pub inbox_batch_size: usize,

    /// Failed records are requeued until they have failed this many times; 0 disables retry
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// How long completed records are kept
    #[serde(default = "default_retention_period_secs")]
    pub retention_period_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Accepted but not enforced; delivery is at-least-once
    #[serde(default)]
    pub enable_exactly_once_delivery: bool,
}

impl BoxesConfig {
    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_interval_ms)
    }

    pub fn inbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.inbox_poll_interval_ms)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_count,
            Duration::from_millis(self.base_retry_delay_ms),
        )
    }

    pub fn worker_options(&self) -> BoxWorkerOptions {
        BoxWorkerOptions {
            retry_policy: self.retry_policy(),
            enable_exactly_once_delivery: self.enable_exactly_once_delivery,
        }
    }

    /// Empty outbox dictionary whose entries start from these defaults.
    pub fn outbox_configs(&self) -> OutboxConfigs {
        OutboxConfigs::with_defaults(self.outbox_batch_size, self.outbox_poll_interval())
    }

    /// Empty inbox dictionary whose entries start from these defaults.
    pub fn inbox_configs(&self) -> InboxConfigs {
        InboxConfigs::with_defaults(self.inbox_batch_size, self.inbox_poll_interval())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = [
            ("outbox_poll_interval_ms", self.outbox_poll_interval_ms),
            ("inbox_poll_interval_ms", self.inbox_poll_interval_ms),
            ("outbox_batch_size", self.outbox_batch_size as u64),
            ("inbox_batch_size", self.inbox_batch_size as u64),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
        ];
        match positive.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ValidationError::MustBePositive(name)),
            None => Ok(()),
        }
    }
}

impl Default for BoxesConfig {
    fn default() -> Self {
        Self {
            outbox_poll_interval_ms: default_poll_interval_ms(),
            inbox_poll_interval_ms: default_poll_interval_ms(),
            outbox_batch_size: default_batch_size(),
            inbox_batch_size: default_batch_size(),
            max_retry_count: default_max_retry_count(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            retention_period_secs: default_retention_period_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            enable_exactly_once_delivery: false,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retry_count() -> u32 {
    5
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_retention_period_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    6 * 60 * 60
}
