//! In-memory partitioned log broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{EventEnvelope, EventPublisher, PublishError};
use tokio::sync::mpsc;

/// Returns the dead-letter topic paired with a topic.
pub fn dlq_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}

#[derive(Default)]
struct BrokerState {
    logs: HashMap<String, Vec<EventEnvelope>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<EventEnvelope>>>,
}

/// In-memory stand-in for a partitioned, consumer-group log broker.
///
/// Every publish appends to a per-topic log (kept for inspection) and fans
/// out to live subscribers. Delivery to a subscriber is at-least-once in
/// spirit: the broker never deduplicates, and consumers must tolerate
/// replays.
#[derive(Default, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    fail_publish: Arc<Mutex<bool>>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a topic, receiving every envelope published after
    /// this call.
    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<EventEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .expect("broker state poisoned")
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Returns a copy of everything published to a topic.
    pub fn topic_events(&self, topic: &str) -> Vec<EventEnvelope> {
        self.state
            .lock()
            .expect("broker state poisoned")
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the dead-letter log for a topic.
    pub fn dead_letters(&self, topic: &str) -> Vec<EventEnvelope> {
        self.topic_events(&dlq_topic(topic))
    }

    /// Makes every subsequent publish fail (failure-path tests).
    pub fn set_fail_publish(&self, fail: bool) {
        *self.fail_publish.lock().expect("broker state poisoned") = fail;
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), PublishError> {
        if *self.fail_publish.lock().expect("broker state poisoned") {
            return Err(PublishError::Backend {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        let mut state = self.state.lock().expect("broker state poisoned");
        state
            .logs
            .entry(topic.to_string())
            .or_default()
            .push(envelope.clone());
        if let Some(subscribers) = state.subscribers.get_mut(topic) {
            // Closed receivers are pruned lazily on publish.
            subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
        }
        Ok(())
    }
}
