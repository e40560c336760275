//! Event handlers driving the order/stock/payment choreography.

use std::sync::Arc;

use common::{EventEnvelope, EventPublisher, WireEvent};
use inventory::{InventoryError, ReserveItem, StockLedger};
use orders::{OrderEvent, OrderService};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::InMemoryBroker;
use crate::consumer::{ConsumerWorker, EventHandler, RetryPolicy};
use crate::error::RouterError;
use crate::events::{ReservedLine, SagaEvent};
use crate::payment::PaymentService;

/// Routes choreography events between the order side, the stock ledger,
/// and the payment collaborator.
///
/// The router holds no transactional scope across aggregates: each handler
/// loads one aggregate, mutates it, persists, publishes the next event,
/// and acknowledges. Every compensating action is an explicit call, never
/// an implicit rollback.
pub struct SagaRouter {
    ledger: Arc<StockLedger>,
    orders: Arc<OrderService>,
    payments: Arc<dyn PaymentService>,
    publisher: Arc<dyn EventPublisher>,
}

impl SagaRouter {
    /// Creates a router over the given collaborators.
    pub fn new(
        ledger: Arc<StockLedger>,
        orders: Arc<OrderService>,
        payments: Arc<dyn PaymentService>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            ledger,
            orders,
            payments,
            publisher,
        }
    }

    /// `OrderCreated`: reserve stock for every line, atomically.
    ///
    /// A complete reservation emits the order-level `StockReserved` summary
    /// with the real item attributes threaded through. A business failure
    /// emits `InsufficientStock` naming the first failing product; the
    /// batch has already rolled back its own partial reservations.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn handle_order_created(&self, envelope: &EventEnvelope) -> Result<(), RouterError> {
        let (order_id, items) = match decode::<OrderEvent>(envelope)? {
            OrderEvent::OrderCreated {
                order_id, items, ..
            } => (order_id, items),
            other => {
                return Err(RouterError::Unexpected(format!(
                    "unexpected {} on orders.created",
                    other.event_type()
                )));
            }
        };

        let request: Vec<ReserveItem> = items
            .iter()
            .map(|line| ReserveItem {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
            })
            .collect();

        match self.ledger.reserve_batch(order_id, &request, true).await {
            Ok(batch) => {
                let reservations: Vec<ReservedLine> = batch
                    .handles
                    .iter()
                    .filter_map(|handle| {
                        items
                            .iter()
                            .find(|line| line.product_id == handle.product_id)
                            .map(|line| ReservedLine {
                                product_id: handle.product_id.clone(),
                                product_name: line.product_name.clone(),
                                reservation_id: handle.reservation_id,
                                quantity: handle.quantity,
                                unit_price: line.unit_price,
                                expires_at: handle.expires_at,
                            })
                    })
                    .collect();
                self.publish(SagaEvent::StockReserved {
                    order_id,
                    reservations,
                })
                .await
            }
            Err(InventoryError::BatchReservationFailed { product_id, source })
                if !source.is_retryable() =>
            {
                tracing::info!(%order_id, %product_id, reason = %source, "batch reservation failed");
                self.publish(SagaEvent::InsufficientStock {
                    order_id,
                    product_id,
                    reason: source.to_string(),
                })
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `StockReserved`: record reservations, move to payment, and issue
    /// the charge.
    ///
    /// A stale delivery (order not `Confirmed`) surfaces as a state error
    /// and is skipped by the consumer wrapper. A charge failure marks the
    /// order `Failed`; releasing its stock is left to the failed-order
    /// handler so payment and stock stay decoupled.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn handle_stock_reserved(&self, envelope: &EventEnvelope) -> Result<(), RouterError> {
        let (order_id, reservations) = match decode::<SagaEvent>(envelope)? {
            SagaEvent::StockReserved {
                order_id,
                reservations,
            } => (order_id, reservations),
            other => return Err(unexpected(&other, "inventory.stock-reserved")),
        };

        let reservation_ids = reservations.iter().map(|r| r.reservation_id).collect();
        let order = self
            .orders
            .record_stock_reserved(order_id, reservation_ids)
            .await?;

        match self.payments.charge(order_id, order.total_amount()).await {
            Ok(result) => {
                self.publish(SagaEvent::PaymentCompleted {
                    order_id,
                    payment_id: result.payment_id,
                    amount: order.total_amount(),
                })
                .await
            }
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "charge failed, failing order");
                self.orders
                    .fail_order(order_id, "payment initiation failed")
                    .await?;
                Ok(())
            }
        }
    }

    /// `PaymentCompleted`: settle the order; `OrderPaid` goes out.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn handle_payment_completed(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<(), RouterError> {
        let (order_id, payment_id) = match decode::<SagaEvent>(envelope)? {
            SagaEvent::PaymentCompleted {
                order_id,
                payment_id,
                ..
            } => (order_id, payment_id),
            other => return Err(unexpected(&other, "payments.completed")),
        };

        self.orders.complete_payment(order_id, &payment_id).await?;
        Ok(())
    }

    /// `OrderPaid`: confirm every reservation, deducting the stock.
    ///
    /// Deduction is idempotent on the ledger side, so a redelivery cannot
    /// double-deduct.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn handle_order_paid(&self, envelope: &EventEnvelope) -> Result<(), RouterError> {
        let order_id = match decode::<OrderEvent>(envelope)? {
            OrderEvent::OrderPaid { order_id, .. } => order_id,
            other => {
                return Err(RouterError::Unexpected(format!(
                    "unexpected {} on orders.paid",
                    other.event_type()
                )));
            }
        };

        let order = self.orders.get(order_id).await?;
        let reservation_ids: Vec<_> = order.reservation_ids().to_vec();
        for reservation_id in &reservation_ids {
            self.ledger.deduct(*reservation_id, order_id).await?;
        }

        self.publish(SagaEvent::StockDeducted {
            order_id,
            reservation_ids,
        })
        .await
    }

    /// `StockDeducted`: the order is ready for fulfillment.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn handle_stock_deducted(&self, envelope: &EventEnvelope) -> Result<(), RouterError> {
        let order_id = match decode::<SagaEvent>(envelope)? {
            SagaEvent::StockDeducted { order_id, .. } => order_id,
            other => return Err(unexpected(&other, "inventory.stock-deducted")),
        };

        self.orders.mark_preparing(order_id).await?;
        Ok(())
    }

    /// `InsufficientStock`: cancel the order as a compensation.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn handle_insufficient_stock(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<(), RouterError> {
        let order_id = match decode::<SagaEvent>(envelope)? {
            SagaEvent::InsufficientStock { order_id, .. } => order_id,
            other => return Err(unexpected(&other, "inventory.stock-insufficient")),
        };

        self.orders
            .cancel_for_compensation(order_id, "stock unavailable")
            .await?;
        Ok(())
    }

    /// `OrderCancelled`: release every reservation the order still holds.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn handle_order_cancelled(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<(), RouterError> {
        let order_id = match decode::<OrderEvent>(envelope)? {
            OrderEvent::OrderCancelled { order_id, .. } => order_id,
            other => {
                return Err(RouterError::Unexpected(format!(
                    "unexpected {} on orders.cancelled",
                    other.event_type()
                )));
            }
        };

        self.ledger
            .release_for_order(order_id, "order cancelled")
            .await?;
        Ok(())
    }

    /// `OrderFailed`: compensating stock release for a failed order.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn handle_order_failed(&self, envelope: &EventEnvelope) -> Result<(), RouterError> {
        let order_id = match decode::<OrderEvent>(envelope)? {
            OrderEvent::OrderFailed { order_id, .. } => order_id,
            other => {
                return Err(RouterError::Unexpected(format!(
                    "unexpected {} on orders.failed",
                    other.event_type()
                )));
            }
        };

        self.ledger
            .release_for_order(order_id, "payment failed")
            .await?;
        Ok(())
    }

    async fn publish(&self, event: SagaEvent) -> Result<(), RouterError> {
        let envelope =
            EventEnvelope::wrap(&event).map_err(|e| RouterError::Publish(e.to_string()))?;
        self.publisher
            .publish(event.topic(), envelope)
            .await
            .map_err(|e| RouterError::Publish(e.to_string()))
    }
}

fn decode<E: WireEvent>(envelope: &EventEnvelope) -> Result<E, RouterError> {
    envelope.decode().map_err(RouterError::Malformed)
}

fn unexpected(event: &SagaEvent, topic: &str) -> RouterError {
    RouterError::Unexpected(format!("unexpected {} on {topic}", event.event_type()))
}

macro_rules! topic_handler {
    ($name:ident, $handler_name:literal, $method:ident) => {
        struct $name(Arc<SagaRouter>);

        #[async_trait::async_trait]
        impl EventHandler for $name {
            fn name(&self) -> &'static str {
                $handler_name
            }

            async fn handle(&self, envelope: &EventEnvelope) -> Result<(), RouterError> {
                self.0.$method(envelope).await
            }
        }
    };
}

topic_handler!(OrderCreatedHandler, "order-created", handle_order_created);
topic_handler!(StockReservedHandler, "stock-reserved", handle_stock_reserved);
topic_handler!(
    InsufficientStockHandler,
    "insufficient-stock",
    handle_insufficient_stock
);
topic_handler!(
    PaymentCompletedHandler,
    "payment-completed",
    handle_payment_completed
);
topic_handler!(OrderPaidHandler, "order-paid", handle_order_paid);
topic_handler!(StockDeductedHandler, "stock-deducted", handle_stock_deducted);
topic_handler!(
    OrderCancelledHandler,
    "order-cancelled",
    handle_order_cancelled
);
topic_handler!(OrderFailedHandler, "order-failed", handle_order_failed);

/// Subscribes a consumer worker per choreography topic.
///
/// Returns a shutdown sender and join handle per worker; callers stop the
/// choreography by sending `true` on every sender.
pub fn spawn_choreography(
    router: Arc<SagaRouter>,
    broker: InMemoryBroker,
    policy: RetryPolicy,
) -> Vec<(watch::Sender<bool>, JoinHandle<()>)> {
    let subscriptions: Vec<(&str, Arc<dyn EventHandler>)> = vec![
        (
            orders::events::ORDERS_CREATED_TOPIC,
            Arc::new(OrderCreatedHandler(Arc::clone(&router))),
        ),
        (
            crate::events::STOCK_RESERVED_TOPIC,
            Arc::new(StockReservedHandler(Arc::clone(&router))),
        ),
        (
            crate::events::STOCK_INSUFFICIENT_TOPIC,
            Arc::new(InsufficientStockHandler(Arc::clone(&router))),
        ),
        (
            crate::events::PAYMENTS_COMPLETED_TOPIC,
            Arc::new(PaymentCompletedHandler(Arc::clone(&router))),
        ),
        (
            orders::events::ORDERS_PAID_TOPIC,
            Arc::new(OrderPaidHandler(Arc::clone(&router))),
        ),
        (
            crate::events::STOCK_DEDUCTED_TOPIC,
            Arc::new(StockDeductedHandler(Arc::clone(&router))),
        ),
        (
            orders::events::ORDERS_CANCELLED_TOPIC,
            Arc::new(OrderCancelledHandler(Arc::clone(&router))),
        ),
        (
            orders::events::ORDERS_FAILED_TOPIC,
            Arc::new(OrderFailedHandler(Arc::clone(&router))),
        ),
    ];

    subscriptions
        .into_iter()
        .map(|(topic, handler)| {
            ConsumerWorker::new(broker.clone(), topic, handler, policy.clone()).spawn()
        })
        .collect()
}
