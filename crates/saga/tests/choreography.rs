//! End-to-end choreography: order placement through fulfillment-ready,
//! with compensation paths.

use std::sync::Arc;
use std::time::Duration;

use common::{CustomerId, EventPublisher, Money, OrderId, ProductId};
use inventory::{InMemoryProductStore, StockConfig, StockLedger};
use locks::{InMemoryLockService, LockService};
use orders::{
    InMemoryOrderStore, NewOrderItem, OrderPolicy, OrderService, OrderStatus,
};
use saga::{
    InMemoryBroker, InMemoryPaymentService, PaymentService, RetryPolicy, SagaRouter,
    router::spawn_choreography,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Harness {
    broker: InMemoryBroker,
    ledger: Arc<StockLedger>,
    orders: Arc<OrderService>,
    payments: Arc<InMemoryPaymentService>,
    workers: Vec<(watch::Sender<bool>, JoinHandle<()>)>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    async fn start(products: &[(&str, u32)]) -> Self {
        init_tracing();
        let broker = InMemoryBroker::new();
        let locks: Arc<dyn LockService> = Arc::new(InMemoryLockService::new());
        let ledger = Arc::new(StockLedger::new(
            Arc::new(InMemoryProductStore::new()),
            locks,
            Arc::new(broker.clone()) as Arc<dyn EventPublisher>,
            StockConfig::default(),
        ));
        let orders = Arc::new(OrderService::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(broker.clone()) as Arc<dyn EventPublisher>,
            OrderPolicy::default(),
        ));
        let payments = Arc::new(InMemoryPaymentService::new());

        for (id, quantity) in products {
            ledger
                .register_product(ProductId::new(*id), "Widget", *quantity, None)
                .await
                .unwrap();
        }

        let router = Arc::new(SagaRouter::new(
            Arc::clone(&ledger),
            Arc::clone(&orders),
            Arc::clone(&payments) as Arc<dyn PaymentService>,
            Arc::new(broker.clone()) as Arc<dyn EventPublisher>,
        ));
        let workers = spawn_choreography(
            router,
            broker.clone(),
            RetryPolicy {
                base_backoff: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
        );

        Self {
            broker,
            ledger,
            orders,
            payments,
            workers,
        }
    }

    async fn stop(self) {
        for (shutdown, handle) in self.workers {
            let _ = shutdown.send(true);
            let _ = handle.await;
        }
    }

    async fn wait_for_status(&self, order_id: OrderId, expected: OrderStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let order = self.orders.get(order_id).await.unwrap();
            if order.status() == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "order {order_id} stuck in {} waiting for {expected}",
                order.status()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn line(product_id: &str, quantity: u32, cents: i64) -> NewOrderItem {
    NewOrderItem {
        product_id: ProductId::new(product_id),
        product_name: format!("Widget {product_id}"),
        quantity,
        unit_price: Money::from_cents(cents),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_happy_path_order_reaches_preparing_with_stock_deducted() {
    let harness = Harness::start(&[("SKU-001", 100), ("SKU-002", 50)]).await;

    let order = harness
        .orders
        .place_order(
            CustomerId::new(),
            vec![line("SKU-001", 3, 1500), line("SKU-002", 1, 2500)],
        )
        .await
        .unwrap();
    let order_id = order.order_id();

    harness.wait_for_status(order_id, OrderStatus::Preparing).await;

    let order = harness.orders.get(order_id).await.unwrap();
    assert_eq!(order.reservation_ids().len(), 2);
    assert!(order.payment_id().is_some());

    // Reservations confirmed: total shrank, nothing still reserved.
    let a = harness
        .ledger
        .product(&ProductId::new("SKU-001"))
        .await
        .unwrap();
    assert_eq!(a.stock().total(), 97);
    assert_eq!(a.stock().reserved(), 0);
    let b = harness
        .ledger
        .product(&ProductId::new("SKU-002"))
        .await
        .unwrap();
    assert_eq!(b.stock().total(), 49);

    // The charge carried the real order total.
    let charges = harness.payments.charges();
    assert_eq!(charges, vec![(order_id, Money::from_cents(3 * 1500 + 2500))]);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_insufficient_stock_cancels_order_and_rolls_back() {
    let harness = Harness::start(&[("SKU-001", 100), ("SKU-002", 2)]).await;

    let order = harness
        .orders
        .place_order(
            CustomerId::new(),
            vec![line("SKU-001", 10, 1500), line("SKU-002", 5, 2500)],
        )
        .await
        .unwrap();
    let order_id = order.order_id();

    harness.wait_for_status(order_id, OrderStatus::Cancelled).await;

    let order = harness.orders.get(order_id).await.unwrap();
    assert_eq!(order.cancellation_reason(), Some("stock unavailable"));

    // The successful line was rolled back by the atomic batch.
    let a = harness
        .ledger
        .product(&ProductId::new("SKU-001"))
        .await
        .unwrap();
    assert_eq!(a.stock().available(), 100);
    assert_eq!(a.stock().reserved(), 0);
    let b = harness
        .ledger
        .product(&ProductId::new("SKU-002"))
        .await
        .unwrap();
    assert_eq!(b.stock().available(), 2);

    // No charge was ever issued.
    assert!(harness.payments.charges().is_empty());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_payment_decline_fails_order_and_releases_stock() {
    let harness = Harness::start(&[("SKU-001", 100)]).await;
    harness.payments.set_decline(true);

    let order = harness
        .orders
        .place_order(CustomerId::new(), vec![line("SKU-001", 10, 1500)])
        .await
        .unwrap();
    let order_id = order.order_id();

    harness.wait_for_status(order_id, OrderStatus::Failed).await;

    let order = harness.orders.get(order_id).await.unwrap();
    assert!(
        order
            .notes()
            .iter()
            .any(|n| n.contains("payment initiation failed"))
    );

    // The failed-order handler released the reservation.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let product = harness
            .ledger
            .product(&ProductId::new("SKU-001"))
            .await
            .unwrap();
        if product.stock().available() == 100 && product.stock().reserved() == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "reservation was never released"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_payment_event_is_skipped() {
    let harness = Harness::start(&[("SKU-001", 100)]).await;

    let order = harness
        .orders
        .place_order(CustomerId::new(), vec![line("SKU-001", 1, 100)])
        .await
        .unwrap();
    let order_id = order.order_id();
    harness.wait_for_status(order_id, OrderStatus::Preparing).await;

    // Redeliver the settled payment; the order has long moved on.
    let replay = harness.broker.topic_events("payments.completed");
    assert_eq!(replay.len(), 1);
    harness
        .broker
        .publish("payments.completed", replay[0].clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Skipped, not dead-lettered, and the order did not move.
    assert!(harness.broker.dead_letters("payments.completed").is_empty());
    let order = harness.orders.get(order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Preparing);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_redelivered_order_created_converges_via_expiry() {
    let harness = Harness::start(&[("SKU-001", 100)]).await;

    let order = harness
        .orders
        .place_order(CustomerId::new(), vec![line("SKU-001", 3, 1500)])
        .await
        .unwrap();
    let order_id = order.order_id();
    harness.wait_for_status(order_id, OrderStatus::Preparing).await;

    // Redeliver the creation event; the handler reserves again because the
    // ledger keys reservations by id, not by order.
    let replay = harness.broker.topic_events("orders.created");
    assert_eq!(replay.len(), 1);
    harness
        .broker
        .publish("orders.created", replay[0].clone())
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let product = harness
            .ledger
            .product(&ProductId::new("SKU-001"))
            .await
            .unwrap();
        if product.stock().reserved() == 3 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "redelivery never re-reserved"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The second StockReserved is stale for an order already in Preparing:
    // skipped, never dead-lettered, and the order does not move.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.broker.dead_letters("inventory.stock-reserved").is_empty());
    let order = harness.orders.get(order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Preparing);

    // Nothing confirms the orphaned hold; the sweeper reclaims it once the
    // TTL lapses and the stock invariant is restored.
    let later = chrono::Utc::now() + chrono::Duration::hours(2);
    let swept = harness
        .ledger
        .sweep_product(&ProductId::new("SKU-001"), later)
        .await
        .unwrap();
    assert_eq!(swept, 1);

    let product = harness
        .ledger
        .product(&ProductId::new("SKU-001"))
        .await
        .unwrap();
    assert_eq!(product.stock().total(), 97);
    assert_eq!(product.stock().available(), 97);
    assert_eq!(product.stock().reserved(), 0);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_payload_goes_to_dead_letter() {
    let harness = Harness::start(&[("SKU-001", 100)]).await;

    let garbage = common::EventEnvelope::builder()
        .event_type("OrderCreated")
        .aggregate_id("not-an-order")
        .payload(serde_json::json!({"type": "OrderCreated", "data": {"bogus": true}}))
        .build();
    harness
        .broker
        .publish("orders.created", garbage)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.broker.dead_letters("orders.created").is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "malformed payload never dead-lettered"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let parked = &harness.broker.dead_letters("orders.created")[0];
    assert_eq!(
        parked.headers.get("dlq.error.class").map(String::as_str),
        Some("Malformed")
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_expired_reservation_returns_stock() {
    let harness = Harness::start(&[("SKU-001", 100)]).await;

    // Reserve directly so no payment flow confirms or releases the hold.
    let handle = harness
        .ledger
        .reserve(&ProductId::new("SKU-001"), OrderId::new(), 25)
        .await
        .unwrap();

    let product = harness
        .ledger
        .product(&ProductId::new("SKU-001"))
        .await
        .unwrap();
    assert_eq!(product.stock().available(), 75);

    // Sweep as if two hours passed.
    let later = chrono::Utc::now() + chrono::Duration::hours(2);
    let swept = harness
        .ledger
        .sweep_product(&ProductId::new("SKU-001"), later)
        .await
        .unwrap();
    assert_eq!(swept, 1);

    let product = harness
        .ledger
        .product(&ProductId::new("SKU-001"))
        .await
        .unwrap();
    assert_eq!(product.stock().available(), 100);
    assert_eq!(
        product
            .stock()
            .reservation(handle.reservation_id)
            .unwrap()
            .status(),
        inventory::ReservationStatus::Expired
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_orders_compete_for_last_unit() {
    let harness = Harness::start(&[("SKU-001", 1)]).await;

    let mut placements = Vec::new();
    for _ in 0..5 {
        let orders = Arc::clone(&harness.orders);
        placements.push(tokio::spawn(async move {
            orders
                .place_order(CustomerId::new(), vec![line("SKU-001", 1, 900)])
                .await
                .unwrap()
                .order_id()
        }));
    }
    let mut order_ids = Vec::new();
    for placement in placements {
        order_ids.push(placement.await.unwrap());
    }

    // Exactly one order wins the unit and reaches Preparing; the rest are
    // cancelled for insufficient stock.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut preparing = 0;
        let mut cancelled = 0;
        for order_id in &order_ids {
            match harness.orders.get(*order_id).await.unwrap().status() {
                OrderStatus::Preparing => preparing += 1,
                OrderStatus::Cancelled => cancelled += 1,
                _ => {}
            }
        }
        if preparing == 1 && cancelled == 4 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "orders never settled: {preparing} preparing, {cancelled} cancelled"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let product = harness
        .ledger
        .product(&ProductId::new("SKU-001"))
        .await
        .unwrap();
    assert_eq!(product.stock().total(), 0);
    assert_eq!(product.stock().reserved(), 0);

    harness.stop().await;
}
