//! Order persistence with optimistic concurrency.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;

use crate::error::OrderError;
use crate::order::Order;

/// Versioned storage for order aggregates.
///
/// Orders have a single logical writer per event, but the version check
/// still guards against an unexpected concurrent write.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Registers a new order.
    async fn insert(&self, order: Order) -> Result<(), OrderError>;

    /// Loads an order by ID.
    async fn load(&self, order_id: OrderId) -> Result<Order, OrderError>;

    /// Persists a mutated order; version-checked.
    ///
    /// On success the aggregate's version is advanced in place. The stored
    /// copy never carries pending events.
    async fn save(&self, order: &mut Order) -> Result<(), OrderError>;
}

/// In-memory order store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), OrderError> {
        // The stored copy never carries pending events; the caller keeps
        // its own copy for publication.
        let mut copy = order;
        copy.drain_events();
        self.orders
            .write()
            .expect("order table poisoned")
            .insert(copy.order_id(), copy);
        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.orders
            .read()
            .expect("order table poisoned")
            .get(&order_id)
            .cloned()
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    async fn save(&self, order: &mut Order) -> Result<(), OrderError> {
        let mut orders = self.orders.write().expect("order table poisoned");
        let stored = orders
            .get(&order.order_id())
            .ok_or(OrderError::OrderNotFound(order.order_id()))?;

        if stored.version() != order.version() {
            return Err(OrderError::VersionConflict {
                order_id: order.order_id(),
                expected: order.version(),
                actual: stored.version(),
            });
        }

        order.set_version(order.version().next());
        let mut copy = order.clone();
        copy.drain_events();
        orders.insert(copy.order_id(), copy);
        Ok(())
    }
}
