//! Outbox and inbox records and their lifecycle.
//!
//! A record wraps an immutable envelope with mutable delivery state.
//! Status only moves forward: Pending to a terminal state. A Failed record
//! may be put back to Pending by a retry policy, but its retry count never
//! decreases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::envelope::{IncomingEventInfo, OutgoingEventInfo};
use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};

/// Reason recorded when a record's type identifier does not resolve.
///
/// Terminal: records failed for this reason are never requeued.
pub const TYPE_NOT_FOUND_REASON: &str = "Type not found";

fn is_retryable(error: Option<&str>) -> bool {
    error != Some(TYPE_NOT_FOUND_REASON)
}

// ============================================
// Retry policy
// ============================================

/// When a Failed record becomes eligible for another attempt.
///
/// The n-th retry waits `base_delay * 2^(n - 1)` after the last failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry_count: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retry_count: u32, base_delay: Duration) -> Self {
        Self {
            max_retry_count,
            base_delay,
        }
    }

    /// A policy that never requeues.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retry_count > 0
    }

    /// Delay before the next attempt for a record that failed `retry_count` times.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Checks whether a record that last failed at `failed_at` may be retried.
    pub fn is_due(&self, retry_count: u32, failed_at: Option<Timestamp>, now: Timestamp) -> bool {
        if retry_count >= self.max_retry_count {
            return false;
        }
        match failed_at {
            Some(at) => !at.plus(self.delay_for(retry_count)).is_after(&now),
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

// ============================================
// Outbox
// ============================================

/// Status of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Persisted, waiting for the sender
    Pending,
    /// Handed to the bus or broker
    Sent,
    /// Last attempt failed
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "sent" => Ok(OutboxStatus::Sent),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(DomainError::new(
                ErrorCode::StorageError,
                format!("Unknown outbox status: {}", other),
            )),
        }
    }
}

/// An outgoing envelope plus its delivery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub event: OutgoingEventInfo,
    pub status: OutboxStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub sent_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
}

impl OutboxRecord {
    /// Creates a pending record.
    pub fn new(event: OutgoingEventInfo) -> Self {
        Self {
            event,
            status: OutboxStatus::Pending,
            error: None,
            retry_count: 0,
            sent_at: None,
            failed_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.event.id
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    /// Marks the record sent. Returns false if it already was.
    pub fn mark_sent(&mut self, at: Timestamp) -> bool {
        if self.status == OutboxStatus::Sent {
            return false;
        }
        self.status = OutboxStatus::Sent;
        self.sent_at = Some(at);
        true
    }

    /// Marks the record failed and counts the attempt.
    ///
    /// A sent record stays sent.
    pub fn mark_failed(&mut self, reason: impl Into<String>, at: Timestamp) -> bool {
        if self.status == OutboxStatus::Sent {
            return false;
        }
        self.status = OutboxStatus::Failed;
        self.error = Some(reason.into());
        self.retry_count += 1;
        self.failed_at = Some(at);
        true
    }

    /// Puts a failed record back in the queue if the policy allows it.
    pub fn requeue_if_due(&mut self, policy: &RetryPolicy, now: Timestamp) -> bool {
        if self.status != OutboxStatus::Failed
            || !is_retryable(self.error.as_deref())
            || !policy.is_due(self.retry_count, self.failed_at, now)
        {
            return false;
        }
        self.status = OutboxStatus::Pending;
        true
    }

    /// When the record reached its current terminal state.
    pub fn completed_at(&self) -> Option<Timestamp> {
        match self.status {
            OutboxStatus::Pending => None,
            OutboxStatus::Sent => self.sent_at,
            OutboxStatus::Failed => self.failed_at,
        }
    }
}

// ============================================
// Inbox
// ============================================

/// Status of an inbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    /// Accepted, waiting for the processor
    Pending,
    /// Dispatched to local handlers
    Processed,
    /// Last attempt failed
    Failed,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Pending => "pending",
            InboxStatus::Processed => "processed",
            InboxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for InboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InboxStatus::Pending),
            "processed" => Ok(InboxStatus::Processed),
            "failed" => Ok(InboxStatus::Failed),
            other => Err(DomainError::new(
                ErrorCode::StorageError,
                format!("Unknown inbox status: {}", other),
            )),
        }
    }
}

/// An incoming envelope plus its processing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxRecord {
    pub event: IncomingEventInfo,
    pub status: InboxStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub processed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
}

impl InboxRecord {
    /// Creates a pending record.
    pub fn new(event: IncomingEventInfo) -> Self {
        Self {
            event,
            status: InboxStatus::Pending,
            error: None,
            retry_count: 0,
            processed_at: None,
            failed_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.event.id
    }

    pub fn is_pending(&self) -> bool {
        self.status == InboxStatus::Pending
    }

    /// Marks the record processed. Returns false if it already was.
    pub fn mark_processed(&mut self, at: Timestamp) -> bool {
        if self.status == InboxStatus::Processed {
            return false;
        }
        self.status = InboxStatus::Processed;
        self.processed_at = Some(at);
        true
    }

    /// Marks the record failed and counts the attempt.
    ///
    /// A processed record stays processed.
    pub fn mark_failed(&mut self, reason: impl Into<String>, at: Timestamp) -> bool {
        if self.status == InboxStatus::Processed {
            return false;
        }
        self.status = InboxStatus::Failed;
        self.error = Some(reason.into());
        self.retry_count += 1;
        self.failed_at = Some(at);
        true
    }

    /// Puts a failed record back in the queue if the policy allows it.
    pub fn requeue_if_due(&mut self, policy: &RetryPolicy, now: Timestamp) -> bool {
        if self.status != InboxStatus::Failed
            || !is_retryable(self.error.as_deref())
            || !policy.is_due(self.retry_count, self.failed_at, now)
        {
            return false;
        }
        self.status = InboxStatus::Pending;
        true
    }

    /// When the record reached its current terminal state.
    pub fn completed_at(&self) -> Option<Timestamp> {
        match self.status {
            InboxStatus::Pending => None,
            InboxStatus::Processed => self.processed_at,
            InboxStatus::Failed => self.failed_at,
        }
    }
}
