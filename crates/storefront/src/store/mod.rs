//! Persistence seams for carts and orders.
//!
//! Both stores are object-safe async traits so the orchestrator and routes
//! never know which backend they talk to; [`memory`] provides the in-process
//! implementation used in production-by-default and in every test. A
//! database-backed implementation slots in behind the same traits.

pub mod memory;

pub use memory::{InMemoryCartStore, InMemoryOrderLedger};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use devsnippets_core::{Address, OrderId, OrderStatus, OwnerId, ProductId};

use crate::models::{Cart, IdempotencyKey, Order};

/// Errors produced by the cart store and order ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No cart exists for the owner.
    #[error("no cart for owner {0}")]
    CartNotFound(OwnerId),

    /// No order with the given ID.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// Mutation attempted while a checkout holds the claim.
    #[error("cart is locked by an in-flight checkout")]
    CartLocked,

    /// Compare-and-set lost: stale version or a competing claim.
    #[error("cart version conflict (expected {expected}, found {found})")]
    VersionConflict {
        /// Version the caller presented.
        expected: u64,
        /// Version actually stored.
        found: u64,
    },

    /// Line item not present in the cart.
    #[error("product {0} is not in the cart")]
    LineNotFound(ProductId),

    /// A line quantity would fall below 1 (or overflow).
    #[error("quantity for {product_id} must be at least 1")]
    InvalidQuantity {
        /// Offending product.
        product_id: ProductId,
    },

    /// Order status may only move forward.
    #[error("order status transition {from:?} -> {to:?} is not allowed")]
    InvalidTransition {
        /// Current status.
        from: OrderStatus,
        /// Requested status.
        to: OrderStatus,
    },

    /// The backing store could not be reached. Transient; retried by the
    /// orchestrator where the operation is idempotent.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Owns per-buyer cart documents with optimistic-concurrency mutation.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Fetch the owner's cart.
    async fn get(&self, owner_id: &OwnerId) -> Result<Cart, StoreError>;

    /// Create an empty cart for the owner, or return the existing one.
    async fn create(&self, owner_id: &OwnerId) -> Result<Cart, StoreError>;

    /// Apply a quantity delta to a line item, creating the cart if absent.
    /// Returns the new cart with its version incremented.
    async fn upsert_line_item(
        &self,
        owner_id: &OwnerId,
        product_id: ProductId,
        quantity_delta: i64,
        unit_price: Decimal,
    ) -> Result<Cart, StoreError>;

    /// Remove a line item.
    async fn remove_line_item(
        &self,
        owner_id: &OwnerId,
        product_id: &ProductId,
    ) -> Result<Cart, StoreError>;

    /// Set or replace the shipping address.
    async fn set_shipping_address(
        &self,
        owner_id: &OwnerId,
        address: Address,
    ) -> Result<Cart, StoreError>;

    /// Atomically transition `Open -> CheckoutInProgress` iff the stored
    /// version equals `expected_version`. The single serialization point
    /// between concurrent checkouts.
    async fn claim_for_checkout(
        &self,
        owner_id: &OwnerId,
        expected_version: u64,
    ) -> Result<Cart, StoreError>;

    /// Terminal transition after the order is durably recorded.
    async fn retire(&self, owner_id: &OwnerId) -> Result<(), StoreError>;

    /// Return a claimed cart to `Open`, items and version untouched.
    async fn release(&self, owner_id: &OwnerId) -> Result<(), StoreError>;

    /// Discard the cart entirely. Rejected while a checkout holds the claim.
    async fn delete(&self, owner_id: &OwnerId) -> Result<(), StoreError>;
}

/// Append-only store of finalized orders with idempotent creation.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Record an order. If an order with the same idempotency key already
    /// exists, the existing order is returned instead - a retried
    /// orchestration is a no-op, never a duplicate.
    async fn create(&self, order: Order) -> Result<Order, StoreError>;

    /// Fetch one order.
    async fn get(&self, order_id: &OrderId) -> Result<Order, StoreError>;

    /// Look up an order by its idempotency key (unique secondary index).
    /// This is the replay probe for re-run checkouts.
    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError>;

    /// All orders for an owner, newest first.
    async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Order>, StoreError>;

    /// Forward-only `Paid -> Refunded` transition.
    async fn mark_refunded(&self, order_id: &OrderId) -> Result<Order, StoreError>;
}
