//! Thread-safe in-memory stores.
//!
//! Carts and orders live in `Arc<RwLock<HashMap>>`; every compound
//! read-modify-write runs under the write lock, which is what makes
//! `claim_for_checkout` an atomic compare-and-set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use devsnippets_core::{Address, CartStatus, OrderId, OwnerId, ProductId};

use crate::models::{Cart, IdempotencyKey, Order};
use crate::store::{CartStore, OrderLedger, StoreError};

/// In-memory cart store keyed by owner.
#[derive(Default, Clone)]
pub struct InMemoryCartStore {
    carts: Arc<RwLock<HashMap<OwnerId, Cart>>>,
}

impl InMemoryCartStore {
    /// Creates a new, empty cart store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get(&self, owner_id: &OwnerId) -> Result<Cart, StoreError> {
        let carts = self.carts.read().await;
        carts
            .get(owner_id)
            .cloned()
            .ok_or_else(|| StoreError::CartNotFound(owner_id.clone()))
    }

    async fn create(&self, owner_id: &OwnerId) -> Result<Cart, StoreError> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .entry(owner_id.clone())
            .or_insert_with(|| Cart::new(owner_id.clone()));
        cart.roll_over_if_retired();
        Ok(cart.clone())
    }

    async fn upsert_line_item(
        &self,
        owner_id: &OwnerId,
        product_id: ProductId,
        quantity_delta: i64,
        unit_price: Decimal,
    ) -> Result<Cart, StoreError> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .entry(owner_id.clone())
            .or_insert_with(|| Cart::new(owner_id.clone()));
        cart.roll_over_if_retired();
        cart.upsert_line_item(product_id, quantity_delta, unit_price)?;
        Ok(cart.clone())
    }

    async fn remove_line_item(
        &self,
        owner_id: &OwnerId,
        product_id: &ProductId,
    ) -> Result<Cart, StoreError> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::CartNotFound(owner_id.clone()))?;
        cart.remove_line_item(product_id)?;
        Ok(cart.clone())
    }

    async fn set_shipping_address(
        &self,
        owner_id: &OwnerId,
        address: Address,
    ) -> Result<Cart, StoreError> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::CartNotFound(owner_id.clone()))?;
        cart.set_shipping_address(address)?;
        Ok(cart.clone())
    }

    async fn claim_for_checkout(
        &self,
        owner_id: &OwnerId,
        expected_version: u64,
    ) -> Result<Cart, StoreError> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::CartNotFound(owner_id.clone()))?;
        cart.claim_for_checkout(expected_version)?;
        Ok(cart.clone())
    }

    async fn retire(&self, owner_id: &OwnerId) -> Result<(), StoreError> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::CartNotFound(owner_id.clone()))?;
        cart.retire()
    }

    async fn release(&self, owner_id: &OwnerId) -> Result<(), StoreError> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::CartNotFound(owner_id.clone()))?;
        cart.release();
        Ok(())
    }

    async fn delete(&self, owner_id: &OwnerId) -> Result<(), StoreError> {
        let mut carts = self.carts.write().await;
        let Some(cart) = carts.get(owner_id) else {
            return Err(StoreError::CartNotFound(owner_id.clone()));
        };
        // Retired carts may be discarded; only an in-flight claim blocks.
        if cart.status() == CartStatus::CheckoutInProgress {
            return Err(StoreError::CartLocked);
        }
        carts.remove(owner_id);
        Ok(())
    }
}

/// In-memory order ledger with a unique secondary index on idempotency key.
#[derive(Default, Clone)]
pub struct InMemoryOrderLedger {
    inner: Arc<RwLock<LedgerInner>>,
}

#[derive(Default)]
struct LedgerInner {
    orders: HashMap<OrderId, Order>,
    by_idempotency_key: HashMap<IdempotencyKey, OrderId>,
}

impl InMemoryOrderLedger {
    /// Creates a new, empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn create(&self, order: Order) -> Result<Order, StoreError> {
        let mut inner = self.inner.write().await;

        // Unique index hit: the retried orchestration gets the original
        // order back instead of a duplicate.
        if let Some(existing_id) = inner.by_idempotency_key.get(order.idempotency_key()) {
            let existing_id = existing_id.clone();
            return inner
                .orders
                .get(&existing_id)
                .cloned()
                .ok_or_else(|| StoreError::OrderNotFound(existing_id));
        }

        inner
            .by_idempotency_key
            .insert(order.idempotency_key().clone(), order.order_id().clone());
        inner.orders.insert(order.order_id().clone(), order.clone());
        Ok(order)
    }

    async fn get(&self, order_id: &OrderId) -> Result<Order, StoreError> {
        let inner = self.inner.read().await;
        inner
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| StoreError::OrderNotFound(order_id.clone()))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_idempotency_key
            .get(key)
            .and_then(|order_id| inner.orders.get(order_id))
            .cloned())
    }

    async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|order| order.owner_id() == owner_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    async fn mark_refunded(&self, order_id: &OrderId) -> Result<Order, StoreError> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.clone()))?;
        order.mark_refunded()?;
        Ok(order.clone())
    }
}
