//! Order aggregate root.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId, ReservationId, Version};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;
use crate::events::{OrderEvent, OrderLine};
use crate::status::OrderStatus;

/// One line of an order.
///
/// Quantity and price are immutable once the order leaves `Pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderItem {
    /// Returns quantity times unit price.
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Order aggregate root.
///
/// Status changes go through [`OrderStatus::can_transition_to`]; an illegal
/// transition fails without mutating the order. Compensating actions are
/// recorded as free-text notes so the order carries its own audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    order_id: OrderId,
    customer_id: CustomerId,
    items: Vec<OrderItem>,
    status: OrderStatus,
    /// Reservation IDs held on the stock side; weak references kept for
    /// compensation only.
    reservation_ids: Vec<ReservationId>,
    payment_id: Option<String>,
    notes: Vec<String>,
    cancellation_reason: Option<String>,
    version: Version,
    created_at: DateTime<Utc>,
    last_modified_at: DateTime<Utc>,

    #[serde(skip)]
    pending_events: Vec<OrderEvent>,
}

impl Order {
    /// Creates a new empty order in `Pending`.
    pub fn new(customer_id: CustomerId) -> Self {
        let now = Utc::now();
        Self {
            order_id: OrderId::new(),
            customer_id,
            items: Vec::new(),
            status: OrderStatus::Pending,
            reservation_ids: Vec::new(),
            payment_id: None,
            notes: Vec::new(),
            cancellation_reason: None,
            version: Version::initial(),
            created_at: now,
            last_modified_at: now,
            pending_events: Vec::new(),
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn reservation_ids(&self) -> &[ReservationId] {
        &self.reservation_ids
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Sets the version (storage layer only).
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the sum of item subtotals.
    pub fn total_amount(&self) -> Money {
        self.items.iter().map(OrderItem::subtotal).sum()
    }

    /// Drains the pending event queue.
    ///
    /// Call once per successful persist; a second drain yields nothing.
    pub fn drain_events(&mut self) -> Vec<OrderEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Returns the pending events without draining.
    pub fn pending_events(&self) -> &[OrderEvent] {
        &self.pending_events
    }

    /// Appends a free-text note.
    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
        self.touch();
    }

    /// Adds an item. Only permitted while `Pending`; one line per product.
    pub fn add_item(
        &mut self,
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<(), OrderError> {
        self.ensure_pending()?;
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        if self.items.iter().any(|i| i.product_id == product_id) {
            return Err(OrderError::DuplicateItem(product_id));
        }
        self.items.push(OrderItem {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
        });
        self.touch();
        Ok(())
    }

    /// Removes an item. Only permitted while `Pending`.
    pub fn remove_item(&mut self, product_id: &ProductId) -> Result<(), OrderError> {
        self.ensure_pending()?;
        let before = self.items.len();
        self.items.retain(|i| &i.product_id != product_id);
        if self.items.len() == before {
            return Err(OrderError::ItemNotFound(product_id.clone()));
        }
        self.touch();
        Ok(())
    }

    /// Changes an item's quantity. Only permitted while `Pending`.
    pub fn change_quantity(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), OrderError> {
        self.ensure_pending()?;
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| &i.product_id == product_id)
            .ok_or_else(|| OrderError::ItemNotFound(product_id.clone()))?;
        item.quantity = quantity;
        self.touch();
        Ok(())
    }

    /// Confirms the order, locking its items and entering the choreography.
    ///
    /// Emits `OrderCreated` carrying the final item list.
    pub fn confirm(&mut self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        self.transition_to(OrderStatus::Confirmed)?;
        self.pending_events.push(OrderEvent::OrderCreated {
            order_id: self.order_id,
            customer_id: self.customer_id,
            items: self
                .items
                .iter()
                .map(|i| OrderLine {
                    product_id: i.product_id.clone(),
                    product_name: i.product_name.clone(),
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                })
                .collect(),
            total_amount: self.total_amount(),
        });
        Ok(())
    }

    /// Records the stock-side reservations and moves to `PaymentPending`.
    pub fn mark_stock_reserved(
        &mut self,
        reservation_ids: Vec<ReservationId>,
    ) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::PaymentPending)?;
        self.reservation_ids = reservation_ids;
        Ok(())
    }

    /// Moves to `PaymentProcessing` when the payment request is issued.
    pub fn begin_payment_processing(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::PaymentProcessing)
    }

    /// Records settlement and moves to `Paid`. Emits `OrderPaid`.
    pub fn mark_paid(&mut self, payment_id: impl Into<String>) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Paid)?;
        let payment_id = payment_id.into();
        self.payment_id = Some(payment_id.clone());
        self.pending_events.push(OrderEvent::OrderPaid {
            order_id: self.order_id,
            payment_id,
            amount: self.total_amount(),
        });
        Ok(())
    }

    /// Moves to `Preparing` once stock is deducted.
    pub fn mark_preparing(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Preparing)
    }

    /// Marks the order shipped.
    pub fn ship(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Shipped)
    }

    /// Marks the order delivered.
    pub fn deliver(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Delivered)
    }

    /// Closes the order. Emits `OrderCompleted`.
    pub fn complete(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Completed)?;
        self.pending_events.push(OrderEvent::OrderCompleted {
            order_id: self.order_id,
        });
        Ok(())
    }

    /// Cancels the order, recording the reason and a compensating note.
    ///
    /// Requires both the cancellable policy gate and a legal table edge, so
    /// a `Paid` order cannot be cancelled directly and must be refunded.
    /// Emits `OrderCancelled` carrying the held reservation IDs.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if !self.status.is_cancellable() {
            return Err(OrderError::InvalidStateTransition {
                from: self.status,
                to: OrderStatus::Cancelled,
            });
        }
        self.transition_to(OrderStatus::Cancelled)?;
        let reason = reason.into();
        self.cancellation_reason = Some(reason.clone());
        self.notes.push(format!("cancelled: {reason}"));
        self.pending_events.push(OrderEvent::OrderCancelled {
            order_id: self.order_id,
            reason,
            reservation_ids: self.reservation_ids.clone(),
        });
        Ok(())
    }

    /// Fails the order irrecoverably. Emits `OrderFailed`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Failed)?;
        let reason = reason.into();
        self.notes.push(format!("failed: {reason}"));
        self.pending_events.push(OrderEvent::OrderFailed {
            order_id: self.order_id,
            reason,
            reservation_ids: self.reservation_ids.clone(),
        });
        Ok(())
    }

    /// Starts a refund for a refundable order.
    pub fn begin_refund(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Refunding)?;
        self.notes.push(format!("refund started: {}", reason.into()));
        Ok(())
    }

    /// Settles the refund.
    pub fn complete_refund(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Refunded)
    }

    fn transition_to(&mut self, target: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(target) {
            return Err(OrderError::InvalidStateTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.touch();
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidStateTransition {
                from: self.status,
                to: OrderStatus::Pending,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.last_modified_at = Utc::now();
    }
}
