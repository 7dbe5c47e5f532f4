//! Order document and idempotency-key derivation.
//!
//! An order is created exactly once per successful authorization. Its
//! identity for dedup purposes is the idempotency key derived from
//! `(owner, cart version)`; everything but `status` is immutable after
//! creation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};

use devsnippets_core::{
    Address, OrderId, OrderStatus, OwnerId, PaymentReference, Price, ProductId,
};

use crate::models::Cart;
use crate::store::StoreError;

/// Token that makes order creation (and the gateway charge) exactly-once.
///
/// Derived deterministically from the owner and the claimed cart version, so
/// a checkout retried after a crash re-issues the same key and converges to
/// the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive the key for a checkout of `owner`'s cart at `cart_version`.
    #[must_use]
    pub fn derive(owner_id: &OwnerId, cart_version: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(owner_id.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(cart_version.to_be_bytes());
        Self(URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable copy of one cart line at authorization time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// A finalized order in the ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    order_id: OrderId,
    idempotency_key: IdempotencyKey,
    owner_id: OwnerId,
    line_items: Vec<OrderLineItem>,
    amount: Price,
    shipping_address: Address,
    payment_reference: PaymentReference,
    status: OrderStatus,
    created_at: DateTime<Utc>,
}

impl Order {
    /// Build a `Paid` order from a claimed cart and an approved charge.
    #[must_use]
    pub fn from_authorized_cart(
        cart: &Cart,
        amount: Price,
        shipping_address: Address,
        payment_reference: PaymentReference,
    ) -> Self {
        let mut line_items: Vec<OrderLineItem> = cart
            .line_items()
            .iter()
            .map(|(product_id, line)| OrderLineItem {
                product_id: product_id.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect();
        // Stable order for serialization and comparison; the cart map is unordered.
        line_items.sort_by(|a, b| a.product_id.cmp(&b.product_id));

        Self {
            order_id: OrderId::generate(),
            idempotency_key: IdempotencyKey::derive(cart.owner_id(), cart.version()),
            owner_id: cart.owner_id().clone(),
            line_items,
            amount,
            shipping_address,
            payment_reference,
            status: OrderStatus::Paid,
            created_at: Utc::now(),
        }
    }

    /// Ledger-assigned order ID.
    #[must_use]
    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Exactly-once creation token.
    #[must_use]
    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    /// Buyer the order belongs to.
    #[must_use]
    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// Immutable line-item copy from the cart at authorization time.
    #[must_use]
    pub fn line_items(&self) -> &[OrderLineItem] {
        &self.line_items
    }

    /// Total charged, including shipping.
    #[must_use]
    pub const fn amount(&self) -> Price {
        self.amount
    }

    /// Gateway reference for the charge.
    #[must_use]
    pub fn payment_reference(&self) -> &PaymentReference {
        &self.payment_reference
    }

    /// Current payment status.
    #[must_use]
    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Advance `Paid -> Refunded`. Forward-only.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the order is currently `Paid`.
    pub fn mark_refunded(&mut self) -> Result<(), StoreError> {
        if self.status != OrderStatus::Paid {
            return Err(StoreError::InvalidTransition {
                from: self.status,
                to: OrderStatus::Refunded,
            });
        }
        self.status = OrderStatus::Refunded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn address() -> Address {
        Address::parse("1 Ferris Way", None, "Crabville", "90210", "US").unwrap()
    }

    fn paid_order() -> Order {
        let mut cart = Cart::new(OwnerId::new("buyer-1"));
        cart.upsert_line_item(ProductId::new("a"), 2, dec!(10.00)).unwrap();
        Order::from_authorized_cart(
            &cart,
            Price::usd(dec!(30.00)),
            address(),
            PaymentReference::new("ch_123"),
        )
    }

    #[test]
    fn test_idempotency_key_is_deterministic() {
        let owner = OwnerId::new("buyer-1");
        assert_eq!(
            IdempotencyKey::derive(&owner, 3),
            IdempotencyKey::derive(&owner, 3)
        );
    }

    #[test]
    fn test_idempotency_key_varies_with_owner_and_version() {
        let owner = OwnerId::new("buyer-1");
        let other = OwnerId::new("buyer-2");
        assert_ne!(
            IdempotencyKey::derive(&owner, 3),
            IdempotencyKey::derive(&owner, 4)
        );
        assert_ne!(
            IdempotencyKey::derive(&owner, 3),
            IdempotencyKey::derive(&other, 3)
        );
    }

    #[test]
    fn test_order_snapshots_cart_lines() {
        let order = paid_order();
        assert_eq!(order.line_items().len(), 1);
        assert_eq!(order.line_items()[0].quantity, 2);
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[test]
    fn test_refund_is_forward_only() {
        let mut order = paid_order();
        order.mark_refunded().unwrap();
        assert_eq!(order.status(), OrderStatus::Refunded);

        let err = order.mark_refunded().unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }
}
