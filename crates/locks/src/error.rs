//! Lock service error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when interacting with the lock service.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock could not be acquired within the bounded wait time.
    ///
    /// Callers treat this as retryable.
    #[error("Failed to acquire lock '{key}' within {wait:?}")]
    AcquisitionTimeout { key: String, wait: Duration },

    /// The token presented on release does not match the current holder.
    ///
    /// This happens when a lease expired and the key was re-acquired by
    /// another holder before the original one released it.
    #[error("Lock '{key}' is no longer held by this token")]
    NotHeld { key: String },

    /// The backing store failed.
    #[error("Lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    /// Returns true if the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::AcquisitionTimeout { .. } | LockError::Backend(_)
        )
    }
}
