//! Outbound event publishing port.

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::EventEnvelope;

/// Errors that can occur when publishing an event.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker rejected or could not accept the event.
    #[error("Publish to '{topic}' failed: {reason}")]
    Backend { topic: String, reason: String },

    /// The event payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Port for publishing envelopes to a partitioned log broker.
///
/// Delivery is at-least-once; consumers must tolerate duplicates. Ordering
/// is guaranteed only among events sharing an `aggregate_id` partition key.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one envelope to a topic.
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), PublishError>;

    /// Publishes a batch of envelopes to a topic, in order.
    async fn publish_all(
        &self,
        topic: &str,
        envelopes: Vec<EventEnvelope>,
    ) -> Result<(), PublishError> {
        for envelope in envelopes {
            self.publish(topic, envelope).await?;
        }
        Ok(())
    }
}
