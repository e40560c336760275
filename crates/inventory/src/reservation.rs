//! Stock reservation entity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, ReservationId};
use serde::{Deserialize, Serialize};

/// The state of a stock reservation.
///
/// `Active` is the only non-terminal state; once a reservation is confirmed,
/// cancelled, or expired it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Quantity is held; awaiting confirmation or release.
    Active,

    /// The reservation was deducted from total stock (terminal).
    Confirmed,

    /// The reservation was explicitly released (terminal).
    Cancelled,

    /// The reservation passed its deadline and was reclaimed (terminal).
    Expired,
}

impl ReservationStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "Active",
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::Cancelled => "Cancelled",
            ReservationStatus::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bounded hold on stock quantity tied to one order.
///
/// Owned exclusively by its `Product`; mutated only through `Stock`
/// operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReservation {
    reservation_id: ReservationId,
    product_id: ProductId,
    order_id: OrderId,
    quantity: u32,
    status: ReservationStatus,
    reserved_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StockReservation {
    /// Default reservation lifetime.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

    /// Minimum allowed lifetime.
    pub const MIN_TTL: Duration = Duration::from_secs(60);

    /// Maximum allowed lifetime.
    pub const MAX_TTL: Duration = Duration::from_secs(60 * 60);

    /// Creates a new active reservation expiring after `ttl`.
    ///
    /// The lifetime is clamped to the 1–60 minute bound.
    pub fn new(
        product_id: ProductId,
        order_id: OrderId,
        quantity: u32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = ttl.clamp(Self::MIN_TTL, Self::MAX_TTL);
        Self {
            reservation_id: ReservationId::new(),
            product_id,
            order_id,
            quantity,
            status: ReservationStatus::Active,
            reserved_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Returns the reservation ID.
    pub fn reservation_id(&self) -> ReservationId {
        self.reservation_id
    }

    /// Returns the owning product ID.
    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Returns the order this hold belongs to.
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Returns the held quantity.
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Returns the current status.
    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    /// Returns when the hold was placed.
    pub fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }

    /// Returns the expiry deadline.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the reservation is Active and past its deadline.
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && now > self.expires_at
    }

    pub(crate) fn mark_confirmed(&mut self) {
        debug_assert_eq!(self.status, ReservationStatus::Active);
        self.status = ReservationStatus::Confirmed;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        debug_assert_eq!(self.status, ReservationStatus::Active);
        self.status = ReservationStatus::Cancelled;
    }

    pub(crate) fn mark_expired(&mut self) {
        debug_assert_eq!(self.status, ReservationStatus::Active);
        self.status = ReservationStatus::Expired;
    }
}
