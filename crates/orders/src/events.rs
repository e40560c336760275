//! Domain events emitted by the order aggregate.

use common::{CustomerId, Money, OrderId, ReservationId, WireEvent};
use serde::{Deserialize, Serialize};

/// Topic for newly confirmed orders entering the choreography.
pub const ORDERS_CREATED_TOPIC: &str = "orders.created";

/// Topic for cancelled orders (consumed for compensating stock release).
pub const ORDERS_CANCELLED_TOPIC: &str = "orders.cancelled";

/// Topic for paid orders (consumed for stock deduction).
pub const ORDERS_PAID_TOPIC: &str = "orders.paid";

/// Topic for completed orders.
pub const ORDERS_COMPLETED_TOPIC: &str = "orders.completed";

/// Topic for failed orders (consumed for compensating stock release).
pub const ORDERS_FAILED_TOPIC: &str = "orders.failed";

/// One order line as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: common::ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Events appended to an order's pending queue by mutating operations.
///
/// All order events partition by order ID. Each variant maps to its own
/// topic so consumers subscribe only to the lifecycle steps they care
/// about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// The order was confirmed with its final item list.
    OrderCreated {
        order_id: OrderId,
        customer_id: CustomerId,
        items: Vec<OrderLine>,
        total_amount: Money,
    },

    /// The order was cancelled; reservations listed for compensation.
    OrderCancelled {
        order_id: OrderId,
        reason: String,
        reservation_ids: Vec<ReservationId>,
    },

    /// Payment settled against the order.
    OrderPaid {
        order_id: OrderId,
        payment_id: String,
        amount: Money,
    },

    /// The order reached its terminal happy state.
    OrderCompleted { order_id: OrderId },

    /// The order failed irrecoverably; reservations listed for compensation.
    OrderFailed {
        order_id: OrderId,
        reason: String,
        reservation_ids: Vec<ReservationId>,
    },
}

impl OrderEvent {
    /// Returns the topic this event is published to.
    pub fn topic(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => ORDERS_CREATED_TOPIC,
            OrderEvent::OrderCancelled { .. } => ORDERS_CANCELLED_TOPIC,
            OrderEvent::OrderPaid { .. } => ORDERS_PAID_TOPIC,
            OrderEvent::OrderCompleted { .. } => ORDERS_COMPLETED_TOPIC,
            OrderEvent::OrderFailed { .. } => ORDERS_FAILED_TOPIC,
        }
    }

    fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderCreated { order_id, .. }
            | OrderEvent::OrderCancelled { order_id, .. }
            | OrderEvent::OrderPaid { order_id, .. }
            | OrderEvent::OrderCompleted { order_id }
            | OrderEvent::OrderFailed { order_id, .. } => *order_id,
        }
    }
}

impl WireEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => "OrderCreated",
            OrderEvent::OrderCancelled { .. } => "OrderCancelled",
            OrderEvent::OrderPaid { .. } => "OrderPaid",
            OrderEvent::OrderCompleted { .. } => "OrderCompleted",
            OrderEvent::OrderFailed { .. } => "OrderFailed",
        }
    }

    fn aggregate_key(&self) -> String {
        self.order_id().to_string()
    }
}
