//! Stock quantities and the reservation book for one product.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::ReservationId;
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;
use crate::reservation::{ReservationStatus, StockReservation};

/// Quantity bookkeeping for a single product.
///
/// Invariant: `available + reserved == total` after every completed
/// mutation. `reserved` always equals the sum of Active reservation
/// quantities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stock {
    available: u32,
    reserved: u32,
    total: u32,
    reservations: HashMap<ReservationId, StockReservation>,
}

impl Stock {
    /// Creates stock with an initial total, all of it available.
    pub fn new(initial: u32) -> Self {
        Self {
            available: initial,
            reserved: 0,
            total: initial,
            reservations: HashMap::new(),
        }
    }

    /// Returns the quantity available for new reservations.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Returns the quantity held by active reservations.
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Returns the total on-hand quantity.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Returns a reservation by ID.
    pub fn reservation(&self, id: ReservationId) -> Option<&StockReservation> {
        self.reservations.get(&id)
    }

    /// Returns all reservations, in no particular order.
    pub fn reservations(&self) -> impl Iterator<Item = &StockReservation> {
        self.reservations.values()
    }

    /// Returns the sum of quantities across Active reservations.
    pub fn active_reserved_sum(&self) -> u32 {
        self.reservations
            .values()
            .filter(|r| r.status() == ReservationStatus::Active)
            .map(StockReservation::quantity)
            .sum()
    }

    /// Moves quantity from available to reserved and books the reservation.
    pub(crate) fn reserve(&mut self, reservation: StockReservation) -> Result<(), InventoryError> {
        let quantity = reservation.quantity();
        if quantity > self.available {
            return Err(InventoryError::InsufficientStock {
                product_id: reservation.product_id().clone(),
                available: self.available,
                requested: quantity,
            });
        }
        self.available -= quantity;
        self.reserved += quantity;
        self.reservations
            .insert(reservation.reservation_id(), reservation);
        self.check_consistency();
        Ok(())
    }

    /// Returns an Active reservation's quantity to available.
    ///
    /// Idempotent: a missing or terminal reservation is a no-op, reported as
    /// `None` so callers can skip event emission.
    pub(crate) fn release(&mut self, id: ReservationId) -> Option<u32> {
        let reservation = self.reservations.get_mut(&id)?;
        if reservation.status() != ReservationStatus::Active {
            return None;
        }
        reservation.mark_cancelled();
        let quantity = reservation.quantity();
        self.available += quantity;
        self.reserved -= quantity;
        self.check_consistency();
        Some(quantity)
    }

    /// Confirms an Active reservation, deducting it from total stock.
    pub(crate) fn confirm(&mut self, id: ReservationId) -> Result<u32, InventoryError> {
        let reservation = self
            .reservations
            .get_mut(&id)
            .ok_or_else(|| InventoryError::invalid_operation(format!(
                "cannot deduct: reservation {id} not found"
            )))?;
        if reservation.status() != ReservationStatus::Active {
            return Err(InventoryError::invalid_operation(format!(
                "cannot deduct: reservation {id} is {}",
                reservation.status()
            )));
        }
        reservation.mark_confirmed();
        let quantity = reservation.quantity();
        self.reserved -= quantity;
        self.total -= quantity;
        self.check_consistency();
        Ok(quantity)
    }

    /// Deducts from available stock without a reservation.
    pub(crate) fn deduct_direct(
        &mut self,
        product_id: &common::ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        if quantity > self.available {
            return Err(InventoryError::InsufficientStock {
                product_id: product_id.clone(),
                available: self.available,
                requested: quantity,
            });
        }
        self.available -= quantity;
        self.total -= quantity;
        self.check_consistency();
        Ok(())
    }

    /// Adds inbound quantity to available and total.
    pub(crate) fn add(&mut self, quantity: u32) {
        self.available += quantity;
        self.total += quantity;
        self.check_consistency();
    }

    /// Resets the total quantity; available absorbs the difference.
    pub(crate) fn adjust(&mut self, new_total: u32) -> Result<(), InventoryError> {
        if new_total < self.reserved {
            return Err(InventoryError::invalid_operation(format!(
                "cannot adjust total below reserved quantity: reserved {}, new total {new_total}",
                self.reserved
            )));
        }
        self.total = new_total;
        self.available = new_total - self.reserved;
        self.check_consistency();
        Ok(())
    }

    /// Expires Active reservations past their deadline.
    ///
    /// Returns `(reservation_id, quantity)` for each reclaimed hold.
    /// Re-running against already-Expired reservations is a no-op.
    pub(crate) fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<(ReservationId, u32)> {
        let due: Vec<ReservationId> = self
            .reservations
            .values()
            .filter(|r| r.is_due_for_expiry(now))
            .map(StockReservation::reservation_id)
            .collect();

        let mut reclaimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(reservation) = self.reservations.get_mut(&id) {
                reservation.mark_expired();
                let quantity = reservation.quantity();
                self.available += quantity;
                self.reserved -= quantity;
                reclaimed.push((id, quantity));
            }
        }
        self.check_consistency();
        reclaimed
    }

    fn check_consistency(&self) {
        debug_assert_eq!(
            self.available + self.reserved,
            self.total,
            "stock invariant violated: available {} + reserved {} != total {}",
            self.available,
            self.reserved,
            self.total
        );
        debug_assert_eq!(self.reserved, self.active_reserved_sum());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, ProductId};
    use std::time::Duration;

    fn active_reservation(quantity: u32) -> StockReservation {
        StockReservation::new(
            ProductId::new("SKU-001"),
            OrderId::new(),
            quantity,
            Duration::from_secs(60),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_stock_all_available() {
        let stock = Stock::new(100);
        assert_eq!(stock.available(), 100);
        assert_eq!(stock.reserved(), 0);
        assert_eq!(stock.total(), 100);
    }

    #[test]
    fn test_reserve_moves_quantity() {
        let mut stock = Stock::new(100);
        stock.reserve(active_reservation(30)).unwrap();

        assert_eq!(stock.available(), 70);
        assert_eq!(stock.reserved(), 30);
        assert_eq!(stock.total(), 100);
    }

    #[test]
    fn test_reserve_more_than_available_fails() {
        let mut stock = Stock::new(10);
        let result = stock.reserve(active_reservation(11));
        assert!(matches!(
            result,
            Err(InventoryError::InsufficientStock {
                available: 10,
                requested: 11,
                ..
            })
        ));
        assert_eq!(stock.available(), 10);
    }

    #[test]
    fn test_release_returns_quantity() {
        let mut stock = Stock::new(100);
        let reservation = active_reservation(30);
        let id = reservation.reservation_id();
        stock.reserve(reservation).unwrap();

        assert_eq!(stock.release(id), Some(30));
        assert_eq!(stock.available(), 100);
        assert_eq!(stock.reserved(), 0);
        assert_eq!(
            stock.reservation(id).unwrap().status(),
            ReservationStatus::Cancelled
        );
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut stock = Stock::new(100);
        let reservation = active_reservation(30);
        let id = reservation.reservation_id();
        stock.reserve(reservation).unwrap();

        assert_eq!(stock.release(id), Some(30));
        assert_eq!(stock.release(id), None);
        assert_eq!(stock.available(), 100);
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut stock = Stock::new(100);
        assert_eq!(stock.release(ReservationId::new()), None);
    }

    #[test]
    fn test_confirm_deducts_total() {
        let mut stock = Stock::new(100);
        let reservation = active_reservation(30);
        let id = reservation.reservation_id();
        stock.reserve(reservation).unwrap();

        assert_eq!(stock.confirm(id).unwrap(), 30);
        assert_eq!(stock.total(), 70);
        assert_eq!(stock.reserved(), 0);
        assert_eq!(stock.available(), 70);
        assert_eq!(
            stock.reservation(id).unwrap().status(),
            ReservationStatus::Confirmed
        );
    }

    #[test]
    fn test_confirm_cancelled_reservation_fails() {
        let mut stock = Stock::new(100);
        let reservation = active_reservation(30);
        let id = reservation.reservation_id();
        stock.reserve(reservation).unwrap();
        stock.release(id);

        assert!(matches!(
            stock.confirm(id),
            Err(InventoryError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_deduct_direct() {
        let mut stock = Stock::new(100);
        stock.deduct_direct(&ProductId::new("SKU-001"), 40).unwrap();
        assert_eq!(stock.available(), 60);
        assert_eq!(stock.total(), 60);
    }

    #[test]
    fn test_adjust_below_reserved_fails() {
        let mut stock = Stock::new(100);
        stock.reserve(active_reservation(30)).unwrap();

        assert!(matches!(
            stock.adjust(20),
            Err(InventoryError::InvalidOperation { .. })
        ));
        assert_eq!(stock.total(), 100);
    }

    #[test]
    fn test_adjust_absorbs_difference_into_available() {
        let mut stock = Stock::new(100);
        stock.reserve(active_reservation(30)).unwrap();

        stock.adjust(50).unwrap();
        assert_eq!(stock.total(), 50);
        assert_eq!(stock.reserved(), 30);
        assert_eq!(stock.available(), 20);
    }

    #[test]
    fn test_expire_due_reclaims_and_is_idempotent() {
        let mut stock = Stock::new(100);
        let reservation = active_reservation(25);
        let id = reservation.reservation_id();
        let reserved_at = reservation.reserved_at();
        stock.reserve(reservation).unwrap();

        let later = reserved_at + chrono::Duration::minutes(2);
        let reclaimed = stock.expire_due(later);
        assert_eq!(reclaimed, vec![(id, 25)]);
        assert_eq!(stock.available(), 100);
        assert_eq!(
            stock.reservation(id).unwrap().status(),
            ReservationStatus::Expired
        );

        // Second sweep finds nothing.
        assert!(stock.expire_due(later).is_empty());
        assert_eq!(stock.available(), 100);
    }

    #[test]
    fn test_reserved_equals_active_sum() {
        let mut stock = Stock::new(100);
        let r1 = active_reservation(10);
        let r2 = active_reservation(20);
        let id1 = r1.reservation_id();
        stock.reserve(r1).unwrap();
        stock.reserve(r2).unwrap();
        assert_eq!(stock.reserved(), stock.active_reserved_sum());

        stock.release(id1);
        assert_eq!(stock.reserved(), 20);
        assert_eq!(stock.reserved(), stock.active_reserved_sum());
    }
}
