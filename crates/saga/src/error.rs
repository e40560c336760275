//! Consumption failure taxonomy.

use inventory::InventoryError;
use orders::OrderError;
use thiserror::Error;

use crate::payment::PaymentError;

/// What the consumer wrapper should do with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient: redeliver with backoff, dead-letter on exhaustion.
    Retry,

    /// Business-rule mismatch: acknowledge and drop. Retrying a stale or
    /// invalid request can never change the outcome.
    Skip,

    /// Unrecoverable: acknowledge and park for manual inspection.
    DeadLetter,
}

/// Errors surfaced by saga event handlers.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The payload could not be deserialized.
    #[error("Malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Republishing the next event in the choreography failed.
    #[error("Event publish failed: {0}")]
    Publish(String),

    /// A handler hit a state it has no rule for.
    #[error("Unexpected: {0}")]
    Unexpected(String),
}

impl RouterError {
    /// Maps an error to the consumer wrapper's strategy.
    ///
    /// The table is static: business-rule violations are skipped,
    /// transient failures (lock timeouts, version conflicts, broker
    /// hiccups) are retried, malformed payloads and everything
    /// unclassifiable go straight to the dead letter.
    pub fn classify(&self) -> FailureKind {
        match self {
            RouterError::Inventory(e) if e.is_retryable() => FailureKind::Retry,
            RouterError::Inventory(_) => FailureKind::Skip,
            RouterError::Order(e) if e.is_retryable() => FailureKind::Retry,
            RouterError::Order(_) => FailureKind::Skip,
            RouterError::Payment(e) if e.is_retryable() => FailureKind::Retry,
            RouterError::Payment(_) => FailureKind::Skip,
            RouterError::Publish(_) => FailureKind::Retry,
            RouterError::Malformed(_) | RouterError::Unexpected(_) => FailureKind::DeadLetter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, ProductId};
    use orders::OrderStatus;

    #[test]
    fn test_business_errors_skip() {
        let insufficient = RouterError::Inventory(InventoryError::InsufficientStock {
            product_id: ProductId::new("SKU-001"),
            available: 1,
            requested: 2,
        });
        assert_eq!(insufficient.classify(), FailureKind::Skip);

        let stale = RouterError::Order(OrderError::InvalidStateTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Paid,
        });
        assert_eq!(stale.classify(), FailureKind::Skip);
    }

    #[test]
    fn test_transient_errors_retry() {
        let lock = RouterError::Inventory(InventoryError::Lock(
            locks::LockError::AcquisitionTimeout {
                key: "product:SKU-001".to_string(),
                wait: std::time::Duration::from_secs(3),
            },
        ));
        assert_eq!(lock.classify(), FailureKind::Retry);

        let conflict = RouterError::Order(OrderError::VersionConflict {
            order_id: OrderId::new(),
            expected: common::Version::initial(),
            actual: common::Version::initial().next(),
        });
        assert_eq!(conflict.classify(), FailureKind::Retry);

        let publish = RouterError::Publish("broker unavailable".to_string());
        assert_eq!(publish.classify(), FailureKind::Retry);
    }

    #[test]
    fn test_malformed_dead_letters() {
        let malformed: RouterError =
            serde_json::from_str::<serde_json::Value>("not json")
                .unwrap_err()
                .into();
        assert_eq!(malformed.classify(), FailureKind::DeadLetter);
    }
}
