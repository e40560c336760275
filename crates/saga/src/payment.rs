//! Payment collaborator boundary.

use std::sync::Mutex;

use async_trait::async_trait;
use common::{Money, OrderId};
use thiserror::Error;
use uuid::Uuid;

/// Errors from the payment collaborator.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The processor rejected the charge.
    #[error("Payment declined: {reason}")]
    Declined { reason: String },

    /// The processor could not be reached.
    #[error("Payment service unavailable: {0}")]
    Unavailable(String),
}

impl PaymentError {
    /// Returns true if the charge may succeed when retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Unavailable(_))
    }
}

/// Result of a successful charge.
#[derive(Debug, Clone)]
pub struct PaymentResult {
    pub payment_id: String,
}

/// Boundary for initiating payment against an order.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges the order total. Settlement is asynchronous; the processor
    /// reports completion as a `PaymentCompleted` event.
    async fn charge(&self, order_id: OrderId, amount: Money)
    -> Result<PaymentResult, PaymentError>;
}

/// In-memory payment service for tests and local runs.
#[derive(Default)]
pub struct InMemoryPaymentService {
    charges: Mutex<Vec<(OrderId, Money)>>,
    decline_next: Mutex<bool>,
}

impl InMemoryPaymentService {
    /// Creates a payment service that approves everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent charge fail with a decline.
    pub fn set_decline(&self, decline: bool) {
        *self.decline_next.lock().expect("payment state poisoned") = decline;
    }

    /// Returns the charges issued so far.
    pub fn charges(&self) -> Vec<(OrderId, Money)> {
        self.charges.lock().expect("payment state poisoned").clone()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: OrderId,
        amount: Money,
    ) -> Result<PaymentResult, PaymentError> {
        if *self.decline_next.lock().expect("payment state poisoned") {
            return Err(PaymentError::Declined {
                reason: "card declined".to_string(),
            });
        }
        self.charges
            .lock()
            .expect("payment state poisoned")
            .push((order_id, amount));
        Ok(PaymentResult {
            payment_id: format!("pay-{}", Uuid::new_v4()),
        })
    }
}
