//! Stock ledger service: locked, version-checked stock mutations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{EventEnvelope, EventPublisher, OrderId, ProductId, ReservationId};
use locks::{LockGuard, LockService, acquire_ordered};
use metrics::{counter, histogram};

use crate::config::StockConfig;
use crate::error::InventoryError;
use crate::product::Product;
use crate::reservation::ReservationStatus;
use crate::store::ProductStore;

/// Topic carrying per-product stock events, partitioned by product ID.
pub const STOCK_EVENTS_TOPIC: &str = "inventory.stock-events";

/// One line of a batch reservation request.
#[derive(Debug, Clone)]
pub struct ReserveItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A successfully booked reservation.
#[derive(Debug, Clone)]
pub struct ReservationHandle {
    pub product_id: ProductId,
    pub reservation_id: ReservationId,
    pub quantity: u32,
    pub expires_at: DateTime<Utc>,
}

/// A per-product failure within a non-atomic batch.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub product_id: ProductId,
    pub reason: String,
}

/// Outcome of a batch reservation.
#[derive(Debug, Clone, Default)]
pub struct BatchReservation {
    pub handles: Vec<ReservationHandle>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReservation {
    /// Returns true if every requested line was reserved.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Serializes all stock mutations for a product.
///
/// Every operation follows the same discipline: acquire the per-product
/// lock, load the aggregate, mutate, save with a version check, then drain
/// and publish the pending events. The lock makes version conflicts rare;
/// the version check makes them harmless.
pub struct StockLedger {
    store: Arc<dyn ProductStore>,
    locks: Arc<dyn LockService>,
    publisher: Arc<dyn EventPublisher>,
    config: StockConfig,
}

impl StockLedger {
    /// Creates a ledger over the given store, lock service, and publisher.
    pub fn new(
        store: Arc<dyn ProductStore>,
        locks: Arc<dyn LockService>,
        publisher: Arc<dyn EventPublisher>,
        config: StockConfig,
    ) -> Self {
        Self {
            store,
            locks,
            publisher,
            config,
        }
    }

    /// Returns the ledger configuration.
    pub fn config(&self) -> &StockConfig {
        &self.config
    }

    /// Registers a new product with its initial stock.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn register_product(
        &self,
        product_id: ProductId,
        name: &str,
        initial_quantity: u32,
        low_stock_threshold: Option<u32>,
    ) -> Result<(), InventoryError> {
        let threshold =
            low_stock_threshold.unwrap_or(self.config.default_low_stock_threshold);
        let product = Product::new(product_id, name, initial_quantity, threshold);
        self.store.insert(product).await
    }

    /// Reserves quantity for an order on a single product.
    #[tracing::instrument(skip(self), fields(product_id = %product_id, order_id = %order_id))]
    pub async fn reserve(
        &self,
        product_id: &ProductId,
        order_id: OrderId,
        quantity: u32,
    ) -> Result<ReservationHandle, InventoryError> {
        let started = std::time::Instant::now();
        let _guard = self.lock_product(product_id).await?;
        let mut product = self.store.load(product_id).await?;

        let result =
            product.reserve(quantity, order_id, self.config.reservation_ttl, Utc::now());
        let reservation_id = match result {
            Ok(id) => id,
            Err(e) => {
                counter!("stock_reservation_failures_total").increment(1);
                return Err(e);
            }
        };
        let expires_at = product
            .stock()
            .reservation(reservation_id)
            .map(|r| r.expires_at())
            .unwrap_or_else(Utc::now);

        self.persist_and_publish(&mut product).await?;
        counter!("stock_reservations_total").increment(1);
        histogram!("stock_reserve_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(ReservationHandle {
            product_id: product_id.clone(),
            reservation_id,
            quantity,
            expires_at,
        })
    }

    /// Reserves quantity across several products for one order.
    ///
    /// Locks are acquired for all products up front, in sorted key order, so
    /// concurrent batches cannot deadlock. With `atomic` set, the first
    /// failing line rolls back every line already reserved and the whole
    /// call fails; otherwise failures are collected per line and returned
    /// alongside the successful handles.
    #[tracing::instrument(skip(self, items), fields(order_id = %order_id, lines = items.len()))]
    pub async fn reserve_batch(
        &self,
        order_id: OrderId,
        items: &[ReserveItem],
        atomic: bool,
    ) -> Result<BatchReservation, InventoryError> {
        if items.is_empty() {
            return Err(InventoryError::invalid_operation(
                "batch reservation requires at least one line",
            ));
        }

        let keys = items.iter().map(|i| Self::lock_key(&i.product_id));
        let _guards = acquire_ordered(
            Arc::clone(&self.locks),
            keys,
            self.config.lock_wait,
            self.config.lock_lease,
        )
        .await?;

        let mut batch = BatchReservation::default();
        for item in items {
            match self.reserve_locked(&item.product_id, order_id, item.quantity).await {
                Ok(handle) => batch.handles.push(handle),
                Err(e) => {
                    counter!("stock_reservation_failures_total").increment(1);
                    if atomic {
                        self.rollback_handles(&batch.handles).await;
                        return Err(InventoryError::BatchReservationFailed {
                            product_id: item.product_id.clone(),
                            source: Box::new(e),
                        });
                    }
                    batch.failures.push(BatchFailure {
                        product_id: item.product_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        counter!("stock_reservations_total").increment(batch.handles.len() as u64);
        Ok(batch)
    }

    /// Releases a reservation, returning its quantity to available stock.
    ///
    /// Idempotent: releasing a missing or already-terminal reservation is a
    /// no-op, so redelivered cancellations are harmless.
    #[tracing::instrument(skip(self), fields(reservation_id = %reservation_id, order_id = %order_id))]
    pub async fn release(
        &self,
        reservation_id: ReservationId,
        order_id: OrderId,
        reason: &str,
    ) -> Result<(), InventoryError> {
        let product_id = match self.store.find_product_for_reservation(reservation_id).await {
            Ok(id) => id,
            Err(InventoryError::ReservationNotFound(_)) => {
                tracing::debug!(%reservation_id, "release of unknown reservation ignored");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let _guard = self.lock_product(&product_id).await?;
        let mut product = self.store.load(&product_id).await?;
        self.ensure_reservation_owner(&product, reservation_id, order_id)?;

        product.release(reservation_id, reason);
        self.persist_and_publish(&mut product).await?;
        counter!("stock_releases_total").increment(1);
        Ok(())
    }

    /// Releases every active reservation held by an order.
    ///
    /// Compensation path for cancelled or failed orders. Returns the number
    /// of reservations released.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn release_for_order(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<usize, InventoryError> {
        let mut released = 0;
        for product_id in self.store.product_ids().await {
            let _guard = self.lock_product(&product_id).await?;
            let mut product = self.store.load(&product_id).await?;

            let held: Vec<ReservationId> = product
                .stock()
                .reservations()
                .filter(|r| {
                    r.order_id() == order_id && r.status() == ReservationStatus::Active
                })
                .map(|r| r.reservation_id())
                .collect();
            if held.is_empty() {
                continue;
            }

            for reservation_id in held {
                product.release(reservation_id, reason);
                released += 1;
            }
            self.persist_and_publish(&mut product).await?;
        }
        counter!("stock_releases_total").increment(released as u64);
        Ok(released)
    }

    /// Confirms a reservation, permanently deducting its quantity.
    ///
    /// Idempotent: deducting an already-confirmed reservation is a no-op,
    /// so redelivered payment events do not double-deduct.
    #[tracing::instrument(skip(self), fields(reservation_id = %reservation_id, order_id = %order_id))]
    pub async fn deduct(
        &self,
        reservation_id: ReservationId,
        order_id: OrderId,
    ) -> Result<(), InventoryError> {
        let product_id = self
            .store
            .find_product_for_reservation(reservation_id)
            .await?;

        let _guard = self.lock_product(&product_id).await?;
        let mut product = self.store.load(&product_id).await?;
        self.ensure_reservation_owner(&product, reservation_id, order_id)?;

        let status = product
            .stock()
            .reservation(reservation_id)
            .map(|r| r.status());
        if status == Some(ReservationStatus::Confirmed) {
            tracing::debug!(%reservation_id, "reservation already deducted, ignoring");
            return Ok(());
        }

        product.deduct(reservation_id)?;
        self.persist_and_publish(&mut product).await?;
        counter!("stock_deductions_total").increment(1);
        Ok(())
    }

    /// Deducts quantity without a reservation (point-of-sale path).
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn deduct_direct(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reason: &str,
    ) -> Result<(), InventoryError> {
        let _guard = self.lock_product(product_id).await?;
        let mut product = self.store.load(product_id).await?;
        product.deduct_direct(quantity, reason)?;
        self.persist_and_publish(&mut product).await?;
        counter!("stock_deductions_total").increment(1);
        Ok(())
    }

    /// Adds inbound stock.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        reason: &str,
    ) -> Result<(), InventoryError> {
        let _guard = self.lock_product(product_id).await?;
        let mut product = self.store.load(product_id).await?;
        product.add_stock(quantity, reason);
        self.persist_and_publish(&mut product).await
    }

    /// Resets a product's total quantity.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn adjust_stock(
        &self,
        product_id: &ProductId,
        new_total: u32,
        reason: &str,
    ) -> Result<(), InventoryError> {
        let _guard = self.lock_product(product_id).await?;
        let mut product = self.store.load(product_id).await?;
        product.adjust_stock(new_total, reason)?;
        self.persist_and_publish(&mut product).await
    }

    /// Expires due reservations on one product. Returns the reclaimed count.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn sweep_product(
        &self,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<usize, InventoryError> {
        let _guard = self.lock_product(product_id).await?;
        let mut product = self.store.load(product_id).await?;

        let reclaimed = product.expire_reservations(now);
        if reclaimed.is_empty() {
            return Ok(0);
        }
        self.persist_and_publish(&mut product).await?;
        counter!("stock_reservations_expired_total").increment(reclaimed.len() as u64);
        Ok(reclaimed.len())
    }

    /// Returns all registered product IDs.
    pub async fn product_ids(&self) -> Vec<ProductId> {
        self.store.product_ids().await
    }

    /// Loads a read-only snapshot of a product.
    pub async fn product(&self, product_id: &ProductId) -> Result<Product, InventoryError> {
        self.store.load(product_id).await
    }

    fn lock_key(product_id: &ProductId) -> String {
        format!("product:{product_id}")
    }

    async fn lock_product(&self, product_id: &ProductId) -> Result<LockGuard, InventoryError> {
        let guard = LockGuard::acquire(
            Arc::clone(&self.locks),
            Self::lock_key(product_id),
            self.config.lock_wait,
            self.config.lock_lease,
        )
        .await?;
        Ok(guard)
    }

    /// Reserve on a product whose lock the caller already holds.
    async fn reserve_locked(
        &self,
        product_id: &ProductId,
        order_id: OrderId,
        quantity: u32,
    ) -> Result<ReservationHandle, InventoryError> {
        let mut product = self.store.load(product_id).await?;
        let reservation_id =
            product.reserve(quantity, order_id, self.config.reservation_ttl, Utc::now())?;
        let expires_at = product
            .stock()
            .reservation(reservation_id)
            .map(|r| r.expires_at())
            .unwrap_or_else(Utc::now);

        self.persist_and_publish(&mut product).await?;
        Ok(ReservationHandle {
            product_id: product_id.clone(),
            reservation_id,
            quantity,
            expires_at,
        })
    }

    /// Undo reservations booked earlier in a failed atomic batch. Locks are
    /// still held by the caller. Rollback failures are logged, not
    /// propagated; the original failure is what the caller reports.
    async fn rollback_handles(&self, handles: &[ReservationHandle]) {
        for handle in handles {
            let result = async {
                let mut product = self.store.load(&handle.product_id).await?;
                product.release(handle.reservation_id, "batch reservation rolled back");
                self.persist_and_publish(&mut product).await
            }
            .await;
            if let Err(e) = result {
                tracing::error!(
                    product_id = %handle.product_id,
                    reservation_id = %handle.reservation_id,
                    error = %e,
                    "failed to roll back batch reservation"
                );
            }
        }
    }

    fn ensure_reservation_owner(
        &self,
        product: &Product,
        reservation_id: ReservationId,
        order_id: OrderId,
    ) -> Result<(), InventoryError> {
        match product.stock().reservation(reservation_id) {
            Some(r) if r.order_id() != order_id => Err(InventoryError::invalid_operation(
                format!("reservation {reservation_id} belongs to a different order"),
            )),
            _ => Ok(()),
        }
    }

    /// Saves the aggregate, then publishes its drained events.
    ///
    /// Publication happens after a successful save so events never describe
    /// state that was not persisted. A publish failure surfaces as a
    /// retryable error; redelivery makes the events flow eventually.
    async fn persist_and_publish(&self, product: &mut Product) -> Result<(), InventoryError> {
        self.store.save(product).await?;

        let events = product.drain_events();
        if events.is_empty() {
            return Ok(());
        }
        let mut envelopes = Vec::with_capacity(events.len());
        for event in &events {
            let envelope = EventEnvelope::wrap(event)
                .map_err(|e| InventoryError::Publish(e.to_string()))?;
            envelopes.push(envelope);
        }
        self.publisher
            .publish_all(STOCK_EVENTS_TOPIC, envelopes)
            .await
            .map_err(|e| InventoryError::Publish(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryProductStore;
    use async_trait::async_trait;
    use common::PublishError;
    use locks::InMemoryLockService;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingPublisher {
        published: Mutex<Vec<(String, EventEnvelope)>>,
    }

    impl CollectingPublisher {
        fn event_types(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(_, e)| e.event_type.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventPublisher for CollectingPublisher {
        async fn publish(
            &self,
            topic: &str,
            envelope: EventEnvelope,
        ) -> Result<(), PublishError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), envelope));
            Ok(())
        }
    }

    struct Fixture {
        ledger: Arc<StockLedger>,
        publisher: Arc<CollectingPublisher>,
    }

    async fn fixture(products: &[(&str, u32)]) -> Fixture {
        let store = Arc::new(InMemoryProductStore::new());
        let locks: Arc<dyn LockService> = Arc::new(InMemoryLockService::new());
        let publisher = Arc::new(CollectingPublisher::default());
        let ledger = Arc::new(StockLedger::new(
            store,
            locks,
            Arc::clone(&publisher) as Arc<dyn EventPublisher>,
            StockConfig::default(),
        ));
        for (id, quantity) in products {
            ledger
                .register_product(ProductId::new(*id), "Widget", *quantity, None)
                .await
                .unwrap();
        }
        Fixture { ledger, publisher }
    }

    #[tokio::test]
    async fn test_reserve_publishes_and_returns_handle() {
        let f = fixture(&[("SKU-001", 100)]).await;
        let handle = f
            .ledger
            .reserve(&ProductId::new("SKU-001"), OrderId::new(), 30)
            .await
            .unwrap();

        assert_eq!(handle.quantity, 30);
        let product = f.ledger.product(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(product.stock().available(), 70);
        assert_eq!(f.publisher.event_types(), vec!["StockReserved"]);
    }

    #[tokio::test]
    async fn test_reserve_insufficient_fails() {
        let f = fixture(&[("SKU-001", 10)]).await;
        let result = f
            .ledger
            .reserve(&ProductId::new("SKU-001"), OrderId::new(), 11)
            .await;
        assert!(matches!(
            result,
            Err(InventoryError::InsufficientStock { .. })
        ));
        assert!(f.publisher.event_types().is_empty());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_through_ledger() {
        let f = fixture(&[("SKU-001", 100)]).await;
        let order_id = OrderId::new();
        let handle = f
            .ledger
            .reserve(&ProductId::new("SKU-001"), order_id, 30)
            .await
            .unwrap();

        f.ledger
            .release(handle.reservation_id, order_id, "order cancelled")
            .await
            .unwrap();
        f.ledger
            .release(handle.reservation_id, order_id, "order cancelled")
            .await
            .unwrap();

        let product = f.ledger.product(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(product.stock().available(), 100);
        assert_eq!(
            f.publisher.event_types(),
            vec!["StockReserved", "StockReleased"]
        );
    }

    #[tokio::test]
    async fn test_release_unknown_reservation_is_noop() {
        let f = fixture(&[("SKU-001", 100)]).await;
        f.ledger
            .release(ReservationId::new(), OrderId::new(), "order cancelled")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_wrong_order_rejected() {
        let f = fixture(&[("SKU-001", 100)]).await;
        let handle = f
            .ledger
            .reserve(&ProductId::new("SKU-001"), OrderId::new(), 30)
            .await
            .unwrap();

        let result = f
            .ledger
            .release(handle.reservation_id, OrderId::new(), "order cancelled")
            .await;
        assert!(matches!(
            result,
            Err(InventoryError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_deduct_is_idempotent() {
        let f = fixture(&[("SKU-001", 100)]).await;
        let order_id = OrderId::new();
        let handle = f
            .ledger
            .reserve(&ProductId::new("SKU-001"), order_id, 30)
            .await
            .unwrap();

        f.ledger.deduct(handle.reservation_id, order_id).await.unwrap();
        f.ledger.deduct(handle.reservation_id, order_id).await.unwrap();

        let product = f.ledger.product(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(product.stock().total(), 70);
        assert_eq!(
            f.publisher.event_types(),
            vec!["StockReserved", "StockDeducted"]
        );
    }

    #[tokio::test]
    async fn test_batch_atomic_rolls_back_on_failure() {
        let f = fixture(&[("SKU-001", 100), ("SKU-002", 5)]).await;
        let items = vec![
            ReserveItem {
                product_id: ProductId::new("SKU-001"),
                quantity: 10,
            },
            ReserveItem {
                product_id: ProductId::new("SKU-002"),
                quantity: 1000,
            },
        ];

        let result = f.ledger.reserve_batch(OrderId::new(), &items, true).await;
        match result {
            Err(InventoryError::BatchReservationFailed { product_id, source }) => {
                assert_eq!(product_id, ProductId::new("SKU-002"));
                assert!(matches!(
                    *source,
                    InventoryError::InsufficientStock { .. }
                ));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // The first line was rolled back.
        let a = f.ledger.product(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(a.stock().available(), 100);
        assert_eq!(a.stock().reserved(), 0);
    }

    #[tokio::test]
    async fn test_batch_non_atomic_collects_failures() {
        let f = fixture(&[("SKU-001", 100), ("SKU-002", 5)]).await;
        let items = vec![
            ReserveItem {
                product_id: ProductId::new("SKU-001"),
                quantity: 10,
            },
            ReserveItem {
                product_id: ProductId::new("SKU-002"),
                quantity: 1000,
            },
        ];

        let batch = f
            .ledger
            .reserve_batch(OrderId::new(), &items, false)
            .await
            .unwrap();
        assert_eq!(batch.handles.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert!(!batch.is_complete());
        assert_eq!(batch.failures[0].product_id, ProductId::new("SKU-002"));

        // The successful line stays reserved.
        let a = f.ledger.product(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(a.stock().reserved(), 10);
    }

    #[tokio::test]
    async fn test_batch_empty_rejected() {
        let f = fixture(&[("SKU-001", 100)]).await;
        assert!(matches!(
            f.ledger.reserve_batch(OrderId::new(), &[], true).await,
            Err(InventoryError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_for_order_releases_all_products() {
        let f = fixture(&[("SKU-001", 100), ("SKU-002", 50)]).await;
        let order_id = OrderId::new();
        let items = vec![
            ReserveItem {
                product_id: ProductId::new("SKU-001"),
                quantity: 10,
            },
            ReserveItem {
                product_id: ProductId::new("SKU-002"),
                quantity: 20,
            },
        ];
        f.ledger
            .reserve_batch(order_id, &items, true)
            .await
            .unwrap();
        // A reservation for some other order stays put.
        f.ledger
            .reserve(&ProductId::new("SKU-001"), OrderId::new(), 5)
            .await
            .unwrap();

        let released = f
            .ledger
            .release_for_order(order_id, "order cancelled")
            .await
            .unwrap();
        assert_eq!(released, 2);

        let a = f.ledger.product(&ProductId::new("SKU-001")).await.unwrap();
        let b = f.ledger.product(&ProductId::new("SKU-002")).await.unwrap();
        assert_eq!(a.stock().reserved(), 5);
        assert_eq!(b.stock().reserved(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_reserves_never_oversell() {
        let f = fixture(&[("SKU-001", 50)]).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = Arc::clone(&f.ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .reserve(&ProductId::new("SKU-001"), OrderId::new(), 5)
                    .await
                    .is_ok()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        // Exactly 10 of the 20 five-unit requests fit into 50.
        assert_eq!(succeeded, 10);
        let product = f.ledger.product(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(product.stock().available(), 0);
        assert_eq!(product.stock().reserved(), 50);
        assert_eq!(product.stock().total(), 50);
        assert_eq!(
            product.stock().reserved(),
            product.stock().active_reserved_sum()
        );
    }

    #[tokio::test]
    async fn test_sweep_product_reclaims_due_reservations() {
        let f = fixture(&[("SKU-001", 100)]).await;
        f.ledger
            .reserve(&ProductId::new("SKU-001"), OrderId::new(), 40)
            .await
            .unwrap();

        // Nothing due yet.
        let swept = f
            .ledger
            .sweep_product(&ProductId::new("SKU-001"), Utc::now())
            .await
            .unwrap();
        assert_eq!(swept, 0);

        let later = Utc::now() + chrono::Duration::hours(2);
        let swept = f
            .ledger
            .sweep_product(&ProductId::new("SKU-001"), later)
            .await
            .unwrap();
        assert_eq!(swept, 1);

        let product = f.ledger.product(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(product.stock().available(), 100);
        assert_eq!(f.publisher.event_types(), vec!["StockReserved", "StockReleased"]);
    }
}
