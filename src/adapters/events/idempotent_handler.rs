//! IdempotentHandler - Wrapper for suppressing replayed deliveries.
//!
//! This adapter wraps any `EventHandler` and uses a `ProcessedEventStore`
//! to ensure each delivered message is handled at most once per handler.
//!
//! ## Usage
//!
//! ```ignore
//! let handler = IdempotentHandler::new(
//!     ReceiptMailer::new(mailer),
//!     processed_event_store.clone(),
//! );
//!
//! bus.subscribe_handler(registry.register::<OrderPlaced>(), Arc::new(handler)).await?;
//! ```
//!
//! ## How It Works
//!
//! 1. Events without a message id (direct publishes) go straight through
//! 2. Before processing: check if the message was already handled by this handler
//! 3. If already processed: skip and return Ok
//! 4. Otherwise delegate, then mark the message processed on success
//!
//! ## Error Handling
//!
//! - If the inner handler fails, the message is NOT marked as processed
//! - This allows retry on the next delivery attempt
//! - ProcessedEventStore errors are propagated to the caller

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::foundation::{AnyEvent, DomainError};
use crate::ports::{EventHandler, ProcessedEventStore};

/// Wrapper that suppresses replays of the same message.
///
/// Uses the inner handler's `name()` as part of the idempotency key.
pub struct IdempotentHandler<H: EventHandler> {
    inner: H,
    processed_events: Arc<dyn ProcessedEventStore>,
}

impl<H: EventHandler> IdempotentHandler<H> {
    /// Create a new IdempotentHandler wrapping the given handler.
    pub fn new(inner: H, processed_events: Arc<dyn ProcessedEventStore>) -> Self {
        Self {
            inner,
            processed_events,
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: EventHandler + 'static> EventHandler for IdempotentHandler<H> {
    async fn handle(&self, event: AnyEvent) -> Result<(), DomainError> {
        let handler_name = self.inner.name();
        let Some(message_id) = event.context().message_id.clone() else {
            return self.inner.handle(event).await;
        };

        if self
            .processed_events
            .contains(&message_id, handler_name)
            .await?
        {
            tracing::debug!(message_id = %message_id, handler = handler_name, "Skipping duplicate delivery");
            return Ok(());
        }

        self.inner.handle(event).await?;

        self.processed_events
            .mark_processed(&message_id, handler_name)
            .await?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn is_reentrant(&self) -> bool {
        self.inner.is_reentrant()
    }

    fn identity(&self) -> usize {
        self.inner.identity()
    }
}
