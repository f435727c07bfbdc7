//! In-memory processed-message store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::ProcessedEventStore;

/// Tracks (message id, handler name) pairs with the time they were recorded.
#[derive(Default)]
pub struct InMemoryProcessedEventStore {
    processed: RwLock<HashMap<(String, String), Timestamp>>,
}

impl InMemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.processed.read().await.len()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn contains(&self, message_id: &str, handler_name: &str) -> Result<bool, DomainError> {
        let key = (message_id.to_string(), handler_name.to_string());
        Ok(self.processed.read().await.contains_key(&key))
    }

    async fn mark_processed(
        &self,
        message_id: &str,
        handler_name: &str,
    ) -> Result<(), DomainError> {
        let key = (message_id.to_string(), handler_name.to_string());
        self.processed
            .write()
            .await
            .entry(key)
            .or_insert_with(Timestamp::now);
        Ok(())
    }

    async fn delete_before(&self, timestamp: Timestamp) -> Result<u64, DomainError> {
        let mut processed = self.processed.write().await;
        let before = processed.len();
        processed.retain(|_, recorded| !recorded.is_before(&timestamp));
        Ok((before - processed.len()) as u64)
    }
}
