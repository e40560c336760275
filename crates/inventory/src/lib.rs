//! Stock ledger for the order/stock/payment choreography.
//!
//! This crate owns the `Product` aggregate and its `StockReservation`s and
//! enforces the quantity invariant `available + reserved == total` under
//! concurrent access. The [`StockLedger`] service serializes every mutation
//! through a per-product lock plus a version-checked write, and the
//! [`ExpirySweeper`] reclaims reservations that were never confirmed or
//! released.

pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod product;
pub mod reservation;
pub mod stock;
pub mod store;
pub mod sweeper;

pub use config::StockConfig;
pub use error::InventoryError;
pub use events::StockEvent;
pub use ledger::{
    BatchFailure, BatchReservation, ReservationHandle, ReserveItem, STOCK_EVENTS_TOPIC,
    StockLedger,
};
pub use product::Product;
pub use reservation::{ReservationStatus, StockReservation};
pub use store::{InMemoryProductStore, ProductStore};
pub use sweeper::ExpirySweeper;
