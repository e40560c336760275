//! Stock ledger error types.

use common::{ProductId, ReservationId, Version};
use locks::LockError;
use thiserror::Error;

/// Errors that can occur during stock ledger operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Requested quantity exceeds the available quantity.
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// The operation violates a stock business rule.
    #[error("Invalid stock operation: {reason}")]
    InvalidOperation { reason: String },

    /// No product registered under this ID.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// No reservation with this ID exists on the product.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The write lost a race: the stored version advanced since the load.
    ///
    /// Callers reload and retry.
    #[error("Version conflict for {product_id}: expected {expected}, found {actual}")]
    VersionConflict {
        product_id: ProductId,
        expected: Version,
        actual: Version,
    },

    /// An atomic batch reservation failed and was rolled back.
    #[error("Batch reservation failed at product {product_id}: {source}")]
    BatchReservationFailed {
        product_id: ProductId,
        #[source]
        source: Box<InventoryError>,
    },

    /// Per-product lock could not be acquired.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Drained events could not be published.
    #[error("Event publish failed: {0}")]
    Publish(String),
}

impl InventoryError {
    /// Convenience constructor for [`InventoryError::InvalidOperation`].
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        InventoryError::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// Returns true if the operation may succeed when retried as-is.
    ///
    /// Business-rule violations are never retryable: re-delivering the same
    /// request cannot change the outcome.
    pub fn is_retryable(&self) -> bool {
        match self {
            InventoryError::Lock(e) => e.is_retryable(),
            InventoryError::VersionConflict { .. } | InventoryError::Publish(_) => true,
            InventoryError::BatchReservationFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
