//! Shared types for the order/stock/payment choreography.
//!
//! This crate provides the identifiers, the `Money` and `Version` value
//! objects, and the versioned JSON event envelope exchanged between the
//! order side, the stock ledger, and the payment collaborator.

pub mod envelope;
pub mod ids;
pub mod money;
pub mod publisher;
pub mod version;

pub use envelope::{EventEnvelope, EventEnvelopeBuilder, EventId, WireEvent};
pub use ids::{CustomerId, OrderId, ProductId, ReservationId};
pub use money::Money;
pub use publisher::{EventPublisher, PublishError};
pub use version::Version;
