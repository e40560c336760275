//! Product persistence with optimistic concurrency.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{ProductId, ReservationId};

use crate::error::InventoryError;
use crate::product::Product;

/// Versioned storage for product aggregates.
///
/// `save` performs a compare-and-swap on the aggregate's version: the write
/// succeeds only if the stored version still matches the version the caller
/// loaded. The ledger holds a per-product lock around load/save, so a
/// conflict indicates a bypassed lock or an operator race; callers reload
/// and retry.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Registers a new product. Fails if the ID is already taken.
    async fn insert(&self, product: Product) -> Result<(), InventoryError>;

    /// Loads a product by ID.
    async fn load(&self, product_id: &ProductId) -> Result<Product, InventoryError>;

    /// Persists a mutated product.
    ///
    /// On success the aggregate's version is advanced in place. The stored
    /// copy never carries pending events.
    async fn save(&self, product: &mut Product) -> Result<(), InventoryError>;

    /// Returns all registered product IDs.
    async fn product_ids(&self) -> Vec<ProductId>;

    /// Finds which product holds the given reservation.
    async fn find_product_for_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<ProductId, InventoryError>;
}

/// In-memory product store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProductStore {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
}

impl InMemoryProductStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ProductId, Product>> {
        self.products.read().expect("product table poisoned")
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ProductId, Product>> {
        self.products.write().expect("product table poisoned")
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn insert(&self, product: Product) -> Result<(), InventoryError> {
        let mut products = self.write_guard();
        if products.contains_key(product.product_id()) {
            return Err(InventoryError::invalid_operation(format!(
                "product {} already registered",
                product.product_id()
            )));
        }
        products.insert(product.product_id().clone(), product);
        Ok(())
    }

    async fn load(&self, product_id: &ProductId) -> Result<Product, InventoryError> {
        self.read_guard()
            .get(product_id)
            .cloned()
            .ok_or_else(|| InventoryError::ProductNotFound(product_id.clone()))
    }

    async fn save(&self, product: &mut Product) -> Result<(), InventoryError> {
        let mut products = self.write_guard();
        let stored = products
            .get(product.product_id())
            .ok_or_else(|| InventoryError::ProductNotFound(product.product_id().clone()))?;

        if stored.version() != product.version() {
            return Err(InventoryError::VersionConflict {
                product_id: product.product_id().clone(),
                expected: product.version(),
                actual: stored.version(),
            });
        }

        product.set_version(product.version().next());
        let mut copy = product.clone();
        copy.drain_events();
        products.insert(copy.product_id().clone(), copy);
        Ok(())
    }

    async fn product_ids(&self) -> Vec<ProductId> {
        self.read_guard().keys().cloned().collect()
    }

    async fn find_product_for_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<ProductId, InventoryError> {
        self.read_guard()
            .values()
            .find(|p| p.stock().reservation(reservation_id).is_some())
            .map(|p| p.product_id().clone())
            .ok_or(InventoryError::ReservationNotFound(reservation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::OrderId;
    use std::time::Duration;

    fn product(id: &str, quantity: u32) -> Product {
        Product::new(ProductId::new(id), "Widget", quantity, 10)
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryProductStore::new();
        store.insert(product("SKU-001", 100)).await.unwrap();

        let loaded = store.load(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(loaded.stock().total(), 100);
    }

    #[tokio::test]
    async fn test_insert_duplicate_fails() {
        let store = InMemoryProductStore::new();
        store.insert(product("SKU-001", 100)).await.unwrap();

        assert!(matches!(
            store.insert(product("SKU-001", 50)).await,
            Err(InventoryError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_missing_fails() {
        let store = InMemoryProductStore::new();
        assert!(matches!(
            store.load(&ProductId::new("SKU-404")).await,
            Err(InventoryError::ProductNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_advances_version_and_clears_events() {
        let store = InMemoryProductStore::new();
        store.insert(product("SKU-001", 100)).await.unwrap();

        let mut loaded = store.load(&ProductId::new("SKU-001")).await.unwrap();
        let before = loaded.version();
        loaded
            .reserve(
                10,
                OrderId::new(),
                Duration::from_secs(300),
                Utc::now(),
            )
            .unwrap();
        store.save(&mut loaded).await.unwrap();
        assert_eq!(loaded.version(), before.next());

        let reloaded = store.load(&ProductId::new("SKU-001")).await.unwrap();
        assert_eq!(reloaded.stock().reserved(), 10);
        assert!(reloaded.pending_events().is_empty());
        // Caller still holds the events for publication.
        assert_eq!(loaded.pending_events().len(), 1);
    }

    #[tokio::test]
    async fn test_save_with_stale_version_conflicts() {
        let store = InMemoryProductStore::new();
        store.insert(product("SKU-001", 100)).await.unwrap();

        let mut first = store.load(&ProductId::new("SKU-001")).await.unwrap();
        let mut second = first.clone();

        first.add_stock(10, "restock");
        store.save(&mut first).await.unwrap();

        second.add_stock(20, "restock");
        assert!(matches!(
            store.save(&mut second).await,
            Err(InventoryError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_product_for_reservation() {
        let store = InMemoryProductStore::new();
        store.insert(product("SKU-001", 100)).await.unwrap();
        store.insert(product("SKU-002", 100)).await.unwrap();

        let mut p = store.load(&ProductId::new("SKU-002")).await.unwrap();
        let reservation_id = p
            .reserve(5, OrderId::new(), Duration::from_secs(300), Utc::now())
            .unwrap();
        store.save(&mut p).await.unwrap();

        let found = store
            .find_product_for_reservation(reservation_id)
            .await
            .unwrap();
        assert_eq!(found, ProductId::new("SKU-002"));

        assert!(matches!(
            store.find_product_for_reservation(ReservationId::new()).await,
            Err(InventoryError::ReservationNotFound(_))
        ));
    }
}
