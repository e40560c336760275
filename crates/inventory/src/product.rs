//! Product aggregate root.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, ReservationId, Version};
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;
use crate::events::{
    LowStockAlertData, StockAdjustedData, StockDeductedData, StockEvent, StockReleasedData,
    StockReservedData,
};
use crate::reservation::StockReservation;
use crate::stock::Stock;

/// Product aggregate root.
///
/// Owns the stock quantities and every reservation against them. All
/// mutations flow through this type so the quantity invariant and the
/// pending-event queue stay consistent. Products are never deleted, only
/// deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    product_id: ProductId,
    name: String,
    stock: Stock,
    low_stock_threshold: u32,
    active: bool,
    version: Version,
    created_at: DateTime<Utc>,
    last_modified_at: DateTime<Utc>,

    /// Drained and published by the caller after a successful persist;
    /// never part of persisted state.
    #[serde(skip)]
    pending_events: Vec<StockEvent>,
}

impl Product {
    /// Creates a new active product with the given initial stock.
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        initial_quantity: u32,
        low_stock_threshold: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            product_id,
            name: name.into(),
            stock: Stock::new(initial_quantity),
            low_stock_threshold,
            active: true,
            version: Version::initial(),
            created_at: now,
            last_modified_at: now,
            pending_events: Vec::new(),
        }
    }

    /// Returns the product ID.
    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Returns the product name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stock bookkeeping.
    pub fn stock(&self) -> &Stock {
        &self.stock
    }

    /// Returns true if the product accepts stock operations.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the optimistic concurrency version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Sets the version (storage layer only).
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Returns when the product was last mutated.
    pub fn last_modified_at(&self) -> DateTime<Utc> {
        self.last_modified_at
    }

    /// Drains the pending event queue.
    ///
    /// Call once per successful persist; a second drain yields nothing.
    pub fn drain_events(&mut self) -> Vec<StockEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Returns the pending events without draining (tests, diagnostics).
    pub fn pending_events(&self) -> &[StockEvent] {
        &self.pending_events
    }

    /// Deactivates the product; further reservations are rejected.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.touch();
    }

    /// Reactivates the product.
    pub fn activate(&mut self) {
        self.active = true;
        self.touch();
    }

    /// Reserves quantity for an order.
    ///
    /// On success an Active reservation is booked, a `StockReserved` event
    /// is appended, and a `LowStockAlert` follows in the same batch if
    /// availability crossed below the threshold.
    pub fn reserve(
        &mut self,
        quantity: u32,
        order_id: OrderId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReservationId, InventoryError> {
        self.ensure_active()?;
        if quantity == 0 {
            return Err(InventoryError::invalid_operation(
                "reservation quantity must be positive",
            ));
        }

        let was_above_threshold = self.stock.available() >= self.low_stock_threshold;
        let reservation =
            StockReservation::new(self.product_id.clone(), order_id, quantity, ttl, now);
        let reservation_id = reservation.reservation_id();
        let expires_at = reservation.expires_at();
        self.stock.reserve(reservation)?;

        self.pending_events
            .push(StockEvent::StockReserved(StockReservedData {
                product_id: self.product_id.clone(),
                product_name: self.name.clone(),
                reservation_id,
                order_id,
                quantity,
                available_after: self.stock.available(),
                expires_at,
            }));
        if was_above_threshold {
            self.check_low_stock();
        }
        self.touch();
        Ok(reservation_id)
    }

    /// Releases a reservation, returning its quantity to available.
    ///
    /// Idempotent: a missing or terminal reservation is a no-op and
    /// emits nothing.
    pub fn release(&mut self, reservation_id: ReservationId, reason: impl Into<String>) {
        let Some(order_id) = self
            .stock
            .reservation(reservation_id)
            .map(StockReservation::order_id)
        else {
            return;
        };
        let Some(quantity) = self.stock.release(reservation_id) else {
            return;
        };

        self.pending_events
            .push(StockEvent::StockReleased(StockReleasedData {
                product_id: self.product_id.clone(),
                reservation_id,
                order_id,
                quantity,
                available_after: self.stock.available(),
                reason: reason.into(),
            }));
        self.touch();
    }

    /// Confirms a reservation, permanently deducting its quantity.
    pub fn deduct(&mut self, reservation_id: ReservationId) -> Result<(), InventoryError> {
        let order_id = self
            .stock
            .reservation(reservation_id)
            .map(StockReservation::order_id);
        let quantity = self.stock.confirm(reservation_id)?;

        self.pending_events
            .push(StockEvent::StockDeducted(StockDeductedData {
                product_id: self.product_id.clone(),
                reservation_id: Some(reservation_id),
                order_id,
                quantity,
                remaining_total: self.stock.total(),
            }));
        self.touch();
        Ok(())
    }

    /// Deducts quantity without a reservation (point-of-sale path).
    pub fn deduct_direct(&mut self, quantity: u32, _reason: &str) -> Result<(), InventoryError> {
        self.ensure_active()?;
        let was_above_threshold = self.stock.available() >= self.low_stock_threshold;
        self.stock.deduct_direct(&self.product_id, quantity)?;

        self.pending_events
            .push(StockEvent::StockDeducted(StockDeductedData {
                product_id: self.product_id.clone(),
                reservation_id: None,
                order_id: None,
                quantity,
                remaining_total: self.stock.total(),
            }));
        if was_above_threshold {
            self.check_low_stock();
        }
        self.touch();
        Ok(())
    }

    /// Adds inbound stock.
    pub fn add_stock(&mut self, quantity: u32, reason: impl Into<String>) {
        let previous_total = self.stock.total();
        self.stock.add(quantity);

        self.pending_events
            .push(StockEvent::StockAdjusted(StockAdjustedData {
                product_id: self.product_id.clone(),
                previous_total,
                new_total: self.stock.total(),
                reason: reason.into(),
            }));
        self.touch();
    }

    /// Resets the total quantity.
    ///
    /// Fails if the new total would shrink below committed reservations.
    pub fn adjust_stock(
        &mut self,
        new_total: u32,
        reason: impl Into<String>,
    ) -> Result<(), InventoryError> {
        let previous_total = self.stock.total();
        self.stock.adjust(new_total)?;

        self.pending_events
            .push(StockEvent::StockAdjusted(StockAdjustedData {
                product_id: self.product_id.clone(),
                previous_total,
                new_total,
                reason: reason.into(),
            }));
        self.touch();
        Ok(())
    }

    /// Expires Active reservations past their deadline.
    ///
    /// Functionally identical to a system-initiated release; emits one
    /// `StockReleased` per reclaimed hold. Returns the reclaimed pairs.
    pub fn expire_reservations(&mut self, now: DateTime<Utc>) -> Vec<(ReservationId, u32)> {
        let order_ids: std::collections::HashMap<ReservationId, OrderId> = self
            .stock
            .reservations()
            .map(|r| (r.reservation_id(), r.order_id()))
            .collect();
        let reclaimed = self.stock.expire_due(now);

        for (reservation_id, quantity) in &reclaimed {
            let Some(order_id) = order_ids.get(reservation_id).copied() else {
                continue;
            };
            self.pending_events
                .push(StockEvent::StockReleased(StockReleasedData {
                    product_id: self.product_id.clone(),
                    reservation_id: *reservation_id,
                    order_id,
                    quantity: *quantity,
                    available_after: self.stock.available(),
                    reason: "reservation expired".to_string(),
                }));
        }
        if !reclaimed.is_empty() {
            self.touch();
        }
        reclaimed
    }

    fn ensure_active(&self) -> Result<(), InventoryError> {
        if !self.active {
            return Err(InventoryError::invalid_operation(format!(
                "product {} is inactive",
                self.product_id
            )));
        }
        Ok(())
    }

    fn check_low_stock(&mut self) {
        if self.stock.available() < self.low_stock_threshold {
            self.pending_events
                .push(StockEvent::LowStockAlert(LowStockAlertData {
                    product_id: self.product_id.clone(),
                    product_name: self.name.clone(),
                    available: self.stock.available(),
                    threshold: self.low_stock_threshold,
                }));
        }
    }

    fn touch(&mut self) {
        self.last_modified_at = Utc::now();
    }
}
