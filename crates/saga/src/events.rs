//! Order-level events exchanged between the stock side and the order side.
//!
//! The per-product `StockEvent`s stay on the inventory topic; the
//! choreography itself runs on these order-level summaries, partitioned by
//! order ID so each order's saga steps are delivered in order.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, ReservationId, WireEvent};
use serde::{Deserialize, Serialize};

/// Topic for successful order-level reservations.
pub const STOCK_RESERVED_TOPIC: &str = "inventory.stock-reserved";

/// Topic for failed order-level reservations.
pub const STOCK_INSUFFICIENT_TOPIC: &str = "inventory.stock-insufficient";

/// Topic for completed order-level deductions.
pub const STOCK_DEDUCTED_TOPIC: &str = "inventory.stock-deducted";

/// Topic for settled payments, as reported by the processor.
pub const PAYMENTS_COMPLETED_TOPIC: &str = "payments.completed";

/// One reserved line, carrying the real item attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservedLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub reservation_id: ReservationId,
    pub quantity: u32,
    pub unit_price: Money,
    pub expires_at: DateTime<Utc>,
}

/// Choreography events keyed by order ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Every line of the order was reserved.
    StockReserved {
        order_id: OrderId,
        reservations: Vec<ReservedLine>,
    },

    /// The atomic batch failed; everything reserved was rolled back.
    InsufficientStock {
        order_id: OrderId,
        product_id: ProductId,
        reason: String,
    },

    /// Every reservation of the order was confirmed and deducted.
    StockDeducted {
        order_id: OrderId,
        reservation_ids: Vec<ReservationId>,
    },

    /// The processor settled the charge.
    PaymentCompleted {
        order_id: OrderId,
        payment_id: String,
        amount: Money,
    },
}

impl SagaEvent {
    /// Returns the topic this event is published to.
    pub fn topic(&self) -> &'static str {
        match self {
            SagaEvent::StockReserved { .. } => STOCK_RESERVED_TOPIC,
            SagaEvent::InsufficientStock { .. } => STOCK_INSUFFICIENT_TOPIC,
            SagaEvent::StockDeducted { .. } => STOCK_DEDUCTED_TOPIC,
            SagaEvent::PaymentCompleted { .. } => PAYMENTS_COMPLETED_TOPIC,
        }
    }

    fn order_id(&self) -> OrderId {
        match self {
            SagaEvent::StockReserved { order_id, .. }
            | SagaEvent::InsufficientStock { order_id, .. }
            | SagaEvent::StockDeducted { order_id, .. }
            | SagaEvent::PaymentCompleted { order_id, .. } => *order_id,
        }
    }
}

impl WireEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::StockReserved { .. } => "StockReserved",
            SagaEvent::InsufficientStock { .. } => "InsufficientStock",
            SagaEvent::StockDeducted { .. } => "StockDeducted",
            SagaEvent::PaymentCompleted { .. } => "PaymentCompleted",
        }
    }

    fn aggregate_key(&self) -> String {
        self.order_id().to_string()
    }
}
