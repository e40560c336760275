//! Order aggregate and state machine for the order/stock/payment
//! choreography.
//!
//! The [`Order`] aggregate owns its items and a validated transition table
//! over thirteen statuses. The [`OrderService`] wraps load/mutate/save with
//! a version check and publishes the aggregate's drained events.

pub mod error;
pub mod events;
pub mod order;
pub mod service;
pub mod status;
pub mod store;

pub use error::OrderError;
pub use events::{OrderEvent, OrderLine};
pub use order::{Order, OrderItem};
pub use service::{NewOrderItem, OrderPolicy, OrderService};
pub use status::OrderStatus;
pub use store::{InMemoryOrderStore, OrderStore};
