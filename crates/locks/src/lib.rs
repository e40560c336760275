//! Per-key mutual exclusion for stock mutations.
//!
//! This crate provides the [`LockService`] boundary used to serialize access
//! to a single product's mutable stock fields, plus an in-memory TTL-lease
//! implementation. Multi-key acquisition sorts keys into a global order so
//! two concurrent batches can never deadlock by acquiring in reverse.

pub mod error;
pub mod memory;
pub mod service;

pub use error::LockError;
pub use memory::InMemoryLockService;
pub use service::{LockGuard, LockService, LockToken, acquire_ordered};
