//! Order service: load/mutate/save plus event publication.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{
    CustomerId, EventEnvelope, EventPublisher, Money, OrderId, ProductId, ReservationId,
};
use metrics::counter;

use crate::error::OrderError;
use crate::order::Order;
use crate::status::OrderStatus;
use crate::store::OrderStore;

/// Order-side policy knobs.
#[derive(Debug, Clone)]
pub struct OrderPolicy {
    /// How long after creation a customer may still cancel.
    pub cancellation_window: Duration,

    /// Maximum number of distinct items per order.
    pub max_items: usize,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            cancellation_window: Duration::from_secs(24 * 3600),
            max_items: 100,
        }
    }
}

impl OrderPolicy {
    /// Loads policy from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cancellation_window: std::env::var("ORDER_CANCELLATION_WINDOW_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|h: u64| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.cancellation_window),
            max_items: std::env::var("ORDER_MAX_ITEMS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_items),
        }
    }
}

/// One requested line when placing an order.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Drives order mutations and publishes the resulting events.
///
/// Every mutation follows load, mutate, save (version-checked), then drain
/// and publish. Each event goes to its own topic.
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    policy: OrderPolicy,
}

impl OrderService {
    /// Creates a service over the given store and publisher.
    pub fn new(
        store: Arc<dyn OrderStore>,
        publisher: Arc<dyn EventPublisher>,
        policy: OrderPolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            policy,
        }
    }

    /// Returns the order policy.
    pub fn policy(&self) -> &OrderPolicy {
        &self.policy
    }

    /// Loads an order snapshot.
    pub async fn get(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.store.load(order_id).await
    }

    /// Places a new order: validates items, confirms, persists, and
    /// publishes `OrderCreated` to start the choreography.
    ///
    /// The order is already `Confirmed` when the event leaves, so the
    /// stock-reserved reply always finds it in the state it expects.
    #[tracing::instrument(skip(self, items), fields(customer_id = %customer_id, lines = items.len()))]
    pub async fn place_order(
        &self,
        customer_id: CustomerId,
        items: Vec<NewOrderItem>,
    ) -> Result<Order, OrderError> {
        if items.len() > self.policy.max_items {
            return Err(OrderError::TooManyItems {
                max: self.policy.max_items,
            });
        }

        let mut order = Order::new(customer_id);
        for item in items {
            order.add_item(
                item.product_id,
                item.product_name,
                item.quantity,
                item.unit_price,
            )?;
        }
        order.confirm()?;

        self.store.insert(order.clone()).await?;
        self.publish_drained(&mut order).await?;
        counter!("orders_placed_total").increment(1);
        tracing::info!(order_id = %order.order_id(), "order placed");
        Ok(order)
    }

    /// Cancels an order on customer request, enforcing the cancellation
    /// window. Event-driven compensations bypass the window via
    /// [`OrderService::cancel_for_compensation`].
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;

        let age = Utc::now() - order.created_at();
        let window = chrono::Duration::from_std(self.policy.cancellation_window)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        if age > window {
            return Err(OrderError::CancellationWindowExpired {
                order_id,
                window_hours: window.num_hours(),
            });
        }

        order.cancel(reason)?;
        self.save_and_publish(&mut order).await?;
        counter!("orders_cancelled_total").increment(1);
        Ok(order)
    }

    /// Cancels an order as a saga compensation, ignoring the window.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_for_compensation(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.cancel(reason)?;
        self.save_and_publish(&mut order).await?;
        counter!("orders_cancelled_total").increment(1);
        Ok(order)
    }

    /// Records the stock-side reservations and moves to `PaymentPending`.
    #[tracing::instrument(skip(self, reservation_ids), fields(order_id = %order_id))]
    pub async fn record_stock_reserved(
        &self,
        order_id: OrderId,
        reservation_ids: Vec<ReservationId>,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.mark_stock_reserved(reservation_ids)?;
        self.save_and_publish(&mut order).await?;
        Ok(order)
    }

    /// Records payment settlement, moving through `PaymentProcessing` to
    /// `Paid`, and publishes `OrderPaid`.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn complete_payment(
        &self,
        order_id: OrderId,
        payment_id: &str,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        if order.status() == OrderStatus::PaymentPending {
            order.begin_payment_processing()?;
        }
        order.mark_paid(payment_id)?;
        self.save_and_publish(&mut order).await?;
        counter!("orders_paid_total").increment(1);
        Ok(order)
    }

    /// Marks the order ready for fulfillment once stock is deducted.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_preparing(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.mark_preparing()?;
        self.save_and_publish(&mut order).await?;
        Ok(order)
    }

    /// Fails an order irrecoverably and publishes `OrderFailed`.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn fail_order(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.fail(reason)?;
        self.save_and_publish(&mut order).await?;
        counter!("orders_failed_total").increment(1);
        Ok(order)
    }

    /// Marks the order shipped.
    pub async fn ship_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.ship()?;
        self.save_and_publish(&mut order).await?;
        Ok(order)
    }

    /// Marks the order delivered.
    pub async fn deliver_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.deliver()?;
        self.save_and_publish(&mut order).await?;
        Ok(order)
    }

    /// Closes the order and publishes `OrderCompleted`.
    pub async fn complete_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.complete()?;
        self.save_and_publish(&mut order).await?;
        Ok(order)
    }

    /// Starts a refund for a refundable order.
    pub async fn refund_order(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.begin_refund(reason)?;
        self.save_and_publish(&mut order).await?;
        Ok(order)
    }

    /// Settles a refund in flight.
    pub async fn complete_refund(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let mut order = self.store.load(order_id).await?;
        order.complete_refund()?;
        self.save_and_publish(&mut order).await?;
        Ok(order)
    }

    async fn save_and_publish(&self, order: &mut Order) -> Result<(), OrderError> {
        self.store.save(order).await?;
        self.publish_drained(order).await
    }

    async fn publish_drained(&self, order: &mut Order) -> Result<(), OrderError> {
        for event in order.drain_events() {
            let envelope =
                EventEnvelope::wrap(&event).map_err(|e| OrderError::Publish(e.to_string()))?;
            self.publisher
                .publish(event.topic(), envelope)
                .await
                .map_err(|e| OrderError::Publish(e.to_string()))?;
        }
        Ok(())
    }
}
