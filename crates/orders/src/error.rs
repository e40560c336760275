//! Order error types.

use common::{OrderId, ProductId, Version};
use thiserror::Error;

use crate::status::OrderStatus;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The requested transition is not in the state machine table.
    #[error("Invalid order state transition: {from} -> {to}")]
    InvalidStateTransition { from: OrderStatus, to: OrderStatus },

    /// Confirming an order that has no items.
    #[error("Cannot confirm order with no items")]
    NoItems,

    /// The order has no item for this product.
    #[error("Order has no item for product {0}")]
    ItemNotFound(ProductId),

    /// The order already has an item for this product.
    #[error("Order already has an item for product {0}")]
    DuplicateItem(ProductId),

    /// Item quantity must be positive.
    #[error("Item quantity must be positive")]
    InvalidQuantity,

    /// The order exceeds the maximum item count.
    #[error("Order exceeds maximum of {max} items")]
    TooManyItems { max: usize },

    /// Cancellation was requested after the allowed window.
    #[error("Cancellation window of {window_hours}h has expired for order {order_id}")]
    CancellationWindowExpired {
        order_id: OrderId,
        window_hours: i64,
    },

    /// No order registered under this ID.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The write lost a race: the stored version advanced since the load.
    #[error("Version conflict for order {order_id}: expected {expected}, found {actual}")]
    VersionConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// Drained events could not be published.
    #[error("Event publish failed: {0}")]
    Publish(String),
}

impl OrderError {
    /// Returns true if the operation may succeed when retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::VersionConflict { .. } | OrderError::Publish(_)
        )
    }
}
