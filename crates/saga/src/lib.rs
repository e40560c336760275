//! Saga choreography for the order/stock/payment flow.
//!
//! The [`SagaRouter`] consumes lifecycle events, drives the order state
//! machine and the stock ledger, and emits the next event in the
//! choreography. The [`ConsumerWorker`] wraps every handler with the
//! retry/skip/dead-letter policy, and the [`InMemoryBroker`] provides a
//! partitioned log with per-topic subscriptions for tests and local runs.

pub mod bus;
pub mod consumer;
pub mod error;
pub mod events;
pub mod payment;
pub mod router;

pub use bus::{InMemoryBroker, dlq_topic};
pub use consumer::{ConsumerWorker, EventHandler, Outcome, RetryPolicy};
pub use error::{FailureKind, RouterError};
pub use events::SagaEvent;
pub use payment::{InMemoryPaymentService, PaymentError, PaymentResult, PaymentService};
pub use router::{SagaRouter, spawn_choreography};
