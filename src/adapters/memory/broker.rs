//! In-process topic/subscription broker.
//!
//! Models the parts of a peek-lock broker the transport adapter relies on:
//! per-subscription filter rules (a new subscription starts with the
//! `$Default` catch-all), locked delivery with delivery counting, and
//! dead-lettering once a message has been abandoned `max_delivery_count`
//! times.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::ports::{
    BrokerClient, BrokerError, OutgoingMessage, ReceivedMessage, RuleDescription, RuleFilter,
    DEFAULT_RULE_NAME,
};

pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

#[derive(Debug, Clone)]
struct StoredMessage {
    message: OutgoingMessage,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct SubscriptionState {
    rules: Vec<RuleDescription>,
    queue: VecDeque<StoredMessage>,
    locked: HashMap<String, StoredMessage>,
    dead_letters: Vec<StoredMessage>,
}

impl SubscriptionState {
    fn with_default_rule() -> Self {
        Self {
            rules: vec![RuleDescription {
                name: DEFAULT_RULE_NAME.to_string(),
                filter: RuleFilter::True,
            }],
            ..Default::default()
        }
    }

    fn accepts(&self, message: &OutgoingMessage) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.filter.matches(&message.label, &message.properties))
    }

    fn lock_batch(&mut self, max_messages: usize) -> Vec<ReceivedMessage> {
        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut stored) = self.queue.pop_front() else {
                break;
            };
            stored.delivery_count += 1;
            let lock_token = Uuid::new_v4().to_string();
            let message = &stored.message;
            batch.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                label: message.label.clone(),
                body: message.body.clone(),
                correlation_id: message.correlation_id.clone(),
                properties: message.properties.clone(),
                lock_token: lock_token.clone(),
                delivery_count: stored.delivery_count,
            });
            self.locked.insert(lock_token, stored);
        }
        batch
    }

    fn take_lock(&mut self, lock_token: &str) -> Result<StoredMessage, BrokerError> {
        self.locked
            .remove(lock_token)
            .ok_or_else(|| BrokerError::LockLost(lock_token.to_string()))
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, HashMap<String, SubscriptionState>>,
}

impl BrokerState {
    fn subscription_mut(
        &mut self,
        entity_path: &str,
        subscription: &str,
    ) -> Result<&mut SubscriptionState, BrokerError> {
        self.topics
            .get_mut(entity_path)
            .ok_or_else(|| BrokerError::EntityNotFound(entity_path.to_string()))?
            .get_mut(subscription)
            .ok_or_else(|| BrokerError::EntityNotFound(format!("{}/{}", entity_path, subscription)))
    }
}

/// Broker kept entirely in memory.
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    arrivals: Notify,
    max_delivery_count: u32,
    fail_admin: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_max_delivery_count(DEFAULT_MAX_DELIVERY_COUNT)
    }

    pub fn with_max_delivery_count(max_delivery_count: u32) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            arrivals: Notify::new(),
            max_delivery_count,
            fail_admin: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_topic(&self, entity_path: &str) {
        self.lock().topics.entry(entity_path.to_string()).or_default();
    }

    /// Creates a subscription with the `$Default` catch-all rule. Creating
    /// an existing subscription leaves it unchanged.
    pub fn create_subscription(&self, entity_path: &str, subscription: &str) {
        self.lock()
            .topics
            .entry(entity_path.to_string())
            .or_default()
            .entry(subscription.to_string())
            .or_insert_with(SubscriptionState::with_default_rule);
    }

    /// Makes every rule operation fail with a transport error.
    pub fn set_admin_failure(&self, failing: bool) {
        self.fail_admin.store(failing, Ordering::SeqCst);
    }

    fn check_admin(&self) -> Result<(), BrokerError> {
        if self.fail_admin.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport("rule management unavailable".to_string()));
        }
        Ok(())
    }

    /// Messages waiting to be received.
    pub fn pending_count(&self, entity_path: &str, subscription: &str) -> usize {
        self.inspect(entity_path, subscription, |s| s.queue.len())
    }

    pub fn locked_count(&self, entity_path: &str, subscription: &str) -> usize {
        self.inspect(entity_path, subscription, |s| s.locked.len())
    }

    pub fn dead_letter_count(&self, entity_path: &str, subscription: &str) -> usize {
        self.inspect(entity_path, subscription, |s| s.dead_letters.len())
    }

    /// Names of the subscription's rules in creation order.
    pub fn rule_names(&self, entity_path: &str, subscription: &str) -> Vec<String> {
        self.inspect(entity_path, subscription, |s| {
            s.rules.iter().map(|r| r.name.clone()).collect()
        })
    }

    fn inspect<T: Default>(
        &self,
        entity_path: &str,
        subscription: &str,
        read: impl FnOnce(&SubscriptionState) -> T,
    ) -> T {
        self.lock()
            .topics
            .get(entity_path)
            .and_then(|subs| subs.get(subscription))
            .map(read)
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn send(&self, entity_path: &str, message: OutgoingMessage) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            let subscriptions = state
                .topics
                .get_mut(entity_path)
                .ok_or_else(|| BrokerError::EntityNotFound(entity_path.to_string()))?;
            for sub in subscriptions.values_mut().filter(|s| s.accepts(&message)) {
                sub.queue.push_back(StoredMessage {
                    message: message.clone(),
                    delivery_count: 0,
                });
            }
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        entity_path: &str,
        subscription: &str,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            {
                let mut state = self.lock();
                let batch = state
                    .subscription_mut(entity_path, subscription)?
                    .lock_batch(max_messages);
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn complete(
        &self,
        entity_path: &str,
        subscription: &str,
        lock_token: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state
            .subscription_mut(entity_path, subscription)?
            .take_lock(lock_token)?;
        Ok(())
    }

    async fn abandon(
        &self,
        entity_path: &str,
        subscription: &str,
        lock_token: &str,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            let sub = state.subscription_mut(entity_path, subscription)?;
            let stored = sub.take_lock(lock_token)?;
            if stored.delivery_count >= self.max_delivery_count {
                tracing::debug!(message_id = %stored.message.message_id, "Message dead-lettered");
                sub.dead_letters.push(stored);
                return Ok(());
            }
            sub.queue.push_front(stored);
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn release(
        &self,
        entity_path: &str,
        subscription: &str,
        lock_token: &str,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            let sub = state.subscription_mut(entity_path, subscription)?;
            let mut stored = sub.take_lock(lock_token)?;
            stored.delivery_count = stored.delivery_count.saturating_sub(1);
            sub.queue.push_front(stored);
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn list_rules(
        &self,
        entity_path: &str,
        subscription: &str,
    ) -> Result<Vec<RuleDescription>, BrokerError> {
        self.check_admin()?;
        let mut state = self.lock();
        Ok(state.subscription_mut(entity_path, subscription)?.rules.clone())
    }

    async fn create_rule(
        &self,
        entity_path: &str,
        subscription: &str,
        rule: RuleDescription,
    ) -> Result<(), BrokerError> {
        self.check_admin()?;
        let mut state = self.lock();
        let sub = state.subscription_mut(entity_path, subscription)?;
        if sub.rules.iter().any(|r| r.name == rule.name) {
            return Err(BrokerError::RuleAlreadyExists(rule.name));
        }
        sub.rules.push(rule);
        Ok(())
    }

    async fn delete_rule(
        &self,
        entity_path: &str,
        subscription: &str,
        rule_name: &str,
    ) -> Result<(), BrokerError> {
        self.check_admin()?;
        let mut state = self.lock();
        let sub = state.subscription_mut(entity_path, subscription)?;
        let before = sub.rules.len();
        sub.rules.retain(|r| r.name != rule_name);
        if sub.rules.len() == before {
            return Err(BrokerError::RuleNotFound(rule_name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::EVENT_TYPE_PROPERTY;
    use std::sync::Arc;

    const TOPIC: &str = "events";
    const SUB: &str = "billing";

    fn broker() -> InMemoryBroker {
        let broker = InMemoryBroker::with_max_delivery_count(2);
        broker.create_subscription(TOPIC, SUB);
        broker
    }

    fn message(label: &str) -> OutgoingMessage {
        OutgoingMessage::new(Uuid::new_v4().to_string(), label, b"{}".to_vec())
            .with_property(EVENT_TYPE_PROPERTY, format!("{}:v1", label))
    }

    #[tokio::test]
    async fn new_subscription_receives_everything_through_default_rule() {
        let broker = broker();
        broker.send(TOPIC, message("a")).await.unwrap();
        broker.send(TOPIC, message("b")).await.unwrap();

        let batch = broker
            .receive(TOPIC, SUB, 10, Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(broker.rule_names(TOPIC, SUB), vec![DEFAULT_RULE_NAME]);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|m| m.delivery_count == 1));
    }

    #[tokio::test]
    async fn type_rules_filter_messages_on_send() {
        let broker = broker();
        broker.delete_rule(TOPIC, SUB, DEFAULT_RULE_NAME).await.unwrap();
        broker
            .create_rule(
                TOPIC,
                SUB,
                RuleDescription {
                    name: "Type-a".to_string(),
                    filter: RuleFilter::EventType {
                        label: "a".to_string(),
                        type_token: "a:v1".to_string(),
                    },
                },
            )
            .await
            .unwrap();

        broker.send(TOPIC, message("a")).await.unwrap();
        broker.send(TOPIC, message("b")).await.unwrap();

        assert_eq!(broker.pending_count(TOPIC, SUB), 1);
    }

    #[tokio::test]
    async fn rule_admin_reports_conflicts() {
        let broker = broker();
        let default_rule = RuleDescription {
            name: DEFAULT_RULE_NAME.to_string(),
            filter: RuleFilter::True,
        };

        assert_eq!(
            broker.create_rule(TOPIC, SUB, default_rule).await,
            Err(BrokerError::RuleAlreadyExists(DEFAULT_RULE_NAME.to_string()))
        );
        assert_eq!(
            broker.delete_rule(TOPIC, SUB, "Type-missing").await,
            Err(BrokerError::RuleNotFound("Type-missing".to_string()))
        );
        assert!(matches!(
            broker.list_rules(TOPIC, "unknown").await,
            Err(BrokerError::EntityNotFound(_))
        ));

        broker.set_admin_failure(true);
        assert!(matches!(
            broker.list_rules(TOPIC, SUB).await,
            Err(BrokerError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn abandon_redelivers_then_dead_letters() {
        let broker = broker();
        broker.send(TOPIC, message("a")).await.unwrap();

        for _ in 0..2 {
            let batch = broker
                .receive(TOPIC, SUB, 1, Duration::from_millis(10))
                .await
                .unwrap();
            broker.abandon(TOPIC, SUB, &batch[0].lock_token).await.unwrap();
        }

        assert_eq!(broker.pending_count(TOPIC, SUB), 0);
        assert_eq!(broker.dead_letter_count(TOPIC, SUB), 1);
    }

    #[tokio::test]
    async fn release_does_not_count_delivery() {
        let broker = broker();
        broker.send(TOPIC, message("a")).await.unwrap();

        for _ in 0..3 {
            let batch = broker
                .receive(TOPIC, SUB, 1, Duration::from_millis(10))
                .await
                .unwrap();
            assert_eq!(batch[0].delivery_count, 1);
            broker.release(TOPIC, SUB, &batch[0].lock_token).await.unwrap();
        }
        assert_eq!(broker.dead_letter_count(TOPIC, SUB), 0);
    }

    #[tokio::test]
    async fn complete_removes_message_and_rejects_stale_lock() {
        let broker = broker();
        broker.send(TOPIC, message("a")).await.unwrap();
        let batch = broker
            .receive(TOPIC, SUB, 1, Duration::from_millis(10))
            .await
            .unwrap();

        broker.complete(TOPIC, SUB, &batch[0].lock_token).await.unwrap();

        assert!(matches!(
            broker.complete(TOPIC, SUB, &batch[0].lock_token).await,
            Err(BrokerError::LockLost(_))
        ));
        assert_eq!(broker.pending_count(TOPIC, SUB), 0);
        assert_eq!(broker.locked_count(TOPIC, SUB), 0);
    }

    #[tokio::test]
    async fn receive_wakes_on_arrival_and_times_out_when_idle() {
        let broker = Arc::new(broker());
        let empty = broker
            .receive(TOPIC, SUB, 1, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(empty.is_empty());

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .receive(TOPIC, SUB, 1, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.send(TOPIC, message("late")).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].label, "late");
    }

    #[tokio::test]
    async fn sending_to_unknown_topic_fails() {
        let broker = InMemoryBroker::new();
        assert!(matches!(
            broker.send("missing", message("a")).await,
            Err(BrokerError::EntityNotFound(_))
        ));
    }
}
