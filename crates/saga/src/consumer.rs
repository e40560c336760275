//! Consumer wrapper applying the retry/skip/dead-letter policy.

use std::sync::Arc;
use std::time::Duration;

use common::{EventEnvelope, EventPublisher};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{InMemoryBroker, dlq_topic};
use crate::error::{FailureKind, RouterError};

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total delivery attempts, including the first.
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles each further attempt.
    pub base_backoff: Duration,

    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Returns the backoff preceding `attempt` (the first retry is
    /// attempt 2).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        let backoff = self.base_backoff.saturating_mul(1u32 << exponent);
        backoff.min(self.max_backoff)
    }
}

/// A handler for one topic's envelopes.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Processes one delivery.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), RouterError>;
}

/// Final disposition of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler succeeded (possibly after retries).
    Handled,

    /// Business-rule mismatch; acknowledged and dropped.
    Skipped,

    /// Parked on the dead-letter topic.
    DeadLettered,
}

/// Wraps a handler with the consumption failure policy.
///
/// Business-rule failures are skipped with a metric, transient failures are
/// retried with exponential backoff until the attempt budget runs out, and
/// malformed or unclassifiable failures go straight to the paired
/// dead-letter topic with diagnostic headers.
pub struct ConsumerWorker {
    broker: InMemoryBroker,
    topic: String,
    handler: Arc<dyn EventHandler>,
    policy: RetryPolicy,
}

impl ConsumerWorker {
    /// Creates a worker for one topic.
    pub fn new(
        broker: InMemoryBroker,
        topic: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            broker,
            topic: topic.into(),
            handler,
            policy,
        }
    }

    /// Processes one delivery to its final disposition.
    pub async fn process(&self, envelope: EventEnvelope) -> Outcome {
        let mut attempt = 1;
        loop {
            match self.handler.handle(&envelope).await {
                Ok(()) => {
                    counter!("saga_events_handled_total", "handler" => self.handler.name())
                        .increment(1);
                    return Outcome::Handled;
                }
                Err(e) => match e.classify() {
                    FailureKind::Skip => {
                        counter!("saga_events_skipped_total", "handler" => self.handler.name())
                            .increment(1);
                        tracing::warn!(
                            handler = self.handler.name(),
                            event_id = %envelope.event_id,
                            error = %e,
                            "stale or invalid event skipped"
                        );
                        return Outcome::Skipped;
                    }
                    FailureKind::Retry if attempt < self.policy.max_attempts => {
                        attempt += 1;
                        let backoff = self.policy.backoff(attempt);
                        tracing::debug!(
                            handler = self.handler.name(),
                            event_id = %envelope.event_id,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    FailureKind::Retry | FailureKind::DeadLetter => {
                        self.dead_letter(&envelope, &e, attempt).await;
                        return Outcome::DeadLettered;
                    }
                },
            }
        }
    }

    /// Subscribes to the topic and processes deliveries until shutdown.
    pub fn spawn(self) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        // Subscribe before spawning so nothing published in between is lost.
        let mut rx = self.broker.subscribe(&self.topic);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    delivery = rx.recv() => {
                        match delivery {
                            Some(envelope) => {
                                self.process(envelope).await;
                            }
                            None => break,
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        (shutdown_tx, handle)
    }

    async fn dead_letter(&self, envelope: &EventEnvelope, error: &RouterError, attempts: u32) {
        counter!("saga_events_dead_lettered_total", "handler" => self.handler.name())
            .increment(1);
        tracing::error!(
            handler = self.handler.name(),
            event_id = %envelope.event_id,
            attempts,
            error = %error,
            "delivery parked on dead-letter topic"
        );

        let mut copy = envelope.clone();
        copy.headers
            .insert("dlq.source.topic".to_string(), self.topic.clone());
        copy.headers
            .insert("dlq.error.class".to_string(), failure_class(error).to_string());
        copy.headers
            .insert("dlq.error.message".to_string(), error.to_string());
        copy.headers
            .insert("dlq.attempts".to_string(), attempts.to_string());

        if let Err(e) = self.broker.publish(&dlq_topic(&self.topic), copy).await {
            tracing::error!(error = %e, topic = %self.topic, "dead-letter publish failed");
        }
    }
}

fn failure_class(error: &RouterError) -> &'static str {
    match error {
        RouterError::Inventory(_) => "Inventory",
        RouterError::Order(_) => "Order",
        RouterError::Payment(_) => "Payment",
        RouterError::Malformed(_) => "Malformed",
        RouterError::Publish(_) => "Publish",
        RouterError::Unexpected(_) => "Unexpected",
    }
}
