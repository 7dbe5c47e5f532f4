//! Cart document and its mutation rules.
//!
//! The cart is the only document contended by concurrent callers, so it
//! carries a `version` token: every buyer-visible mutation increments it,
//! and checkout claims it with a compare-and-set against that token.
//! Claiming, releasing, and retiring do NOT move the version - a checkout
//! retried after a crash must re-derive the same idempotency key from
//! `(owner, version)`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use devsnippets_core::{Address, CartStatus, OwnerId, ProductId};

use crate::store::StoreError;

/// A single cart line: quantity plus the unit price snapshotted when the
/// buyer added the item (prices shown in the cart are the prices charged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Number of units, always >= 1.
    pub quantity: u32,
    /// Unit price snapshot in the store currency's standard unit.
    pub unit_price: Decimal,
}

/// A buyer's cart document, keyed by owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    owner_id: OwnerId,
    version: u64,
    line_items: HashMap<ProductId, LineItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shipping_address: Option<Address>,
    status: CartStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Cart {
    /// Create an empty open cart for `owner_id`.
    #[must_use]
    pub fn new(owner_id: OwnerId) -> Self {
        let now = Utc::now();
        Self {
            owner_id,
            version: 0,
            line_items: HashMap::new(),
            shipping_address: None,
            status: CartStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    /// Owner this cart belongs to.
    #[must_use]
    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// Current optimistic-concurrency token.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> CartStatus {
        self.status
    }

    /// Line items keyed by product.
    #[must_use]
    pub const fn line_items(&self) -> &HashMap<ProductId, LineItem> {
        &self.line_items
    }

    /// Shipping address, if the buyer has provided one.
    #[must_use]
    pub const fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    /// Subtotal derived from line items: sum of quantity x unit price.
    ///
    /// Always recomputed; the cart never caches a total that could diverge.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.line_items
            .values()
            .map(|line| line.unit_price * Decimal::from(line.quantity))
            .sum()
    }

    /// Apply a quantity delta to a line, creating or removing it as needed.
    ///
    /// A delta that brings an existing line to zero or below removes the
    /// line; the unit price snapshot is refreshed on every upsert.
    ///
    /// # Errors
    ///
    /// `CartLocked` while a checkout holds the claim; `InvalidQuantity` if a
    /// new line would start below 1 or the quantity overflows.
    pub fn upsert_line_item(
        &mut self,
        product_id: ProductId,
        quantity_delta: i64,
        unit_price: Decimal,
    ) -> Result<(), StoreError> {
        self.ensure_mutable()?;

        match self.line_items.get(&product_id).copied() {
            Some(line) => {
                let new_quantity = i64::from(line.quantity).saturating_add(quantity_delta);
                if new_quantity <= 0 {
                    self.line_items.remove(&product_id);
                } else {
                    let quantity = u32::try_from(new_quantity)
                        .map_err(|_| StoreError::InvalidQuantity {
                            product_id: product_id.clone(),
                        })?;
                    self.line_items.insert(
                        product_id,
                        LineItem {
                            quantity,
                            unit_price,
                        },
                    );
                }
            }
            None => {
                let quantity = u32::try_from(quantity_delta)
                    .ok()
                    .filter(|q| *q >= 1)
                    .ok_or(StoreError::InvalidQuantity {
                        product_id: product_id.clone(),
                    })?;
                self.line_items.insert(
                    product_id,
                    LineItem {
                        quantity,
                        unit_price,
                    },
                );
            }
        }

        self.touch();
        Ok(())
    }

    /// Remove a line item.
    ///
    /// # Errors
    ///
    /// `CartLocked` while claimed; `LineNotFound` if the product is absent.
    pub fn remove_line_item(&mut self, product_id: &ProductId) -> Result<(), StoreError> {
        self.ensure_mutable()?;
        if self.line_items.remove(product_id).is_none() {
            return Err(StoreError::LineNotFound(product_id.clone()));
        }
        self.touch();
        Ok(())
    }

    /// Set or replace the shipping address.
    ///
    /// # Errors
    ///
    /// `CartLocked` while claimed.
    pub fn set_shipping_address(&mut self, address: Address) -> Result<(), StoreError> {
        self.ensure_mutable()?;
        self.shipping_address = Some(address);
        self.touch();
        Ok(())
    }

    /// Compare-and-set claim: `Open -> CheckoutInProgress` iff the version
    /// matches. This is the single serialization point between concurrent
    /// checkouts and buyer mutations; the version is NOT bumped.
    ///
    /// # Errors
    ///
    /// `VersionConflict` if the version is stale or the cart is not `Open`
    /// (another checkout already won the race).
    pub fn claim_for_checkout(&mut self, expected_version: u64) -> Result<(), StoreError> {
        if self.status != CartStatus::Open || self.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: self.version,
            });
        }
        self.status = CartStatus::CheckoutInProgress;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Release a checkout claim, returning the cart to `Open` with its line
    /// items and version untouched. No-op if the cart is not claimed.
    pub fn release(&mut self) {
        if self.status == CartStatus::CheckoutInProgress {
            self.status = CartStatus::Open;
            self.updated_at = Utc::now();
        }
    }

    /// Replace a retired cart with its successor: empty, `Open`, version
    /// counter continuing above the retired cart's. `(owner, version)`
    /// pairs - and the idempotency keys derived from them - therefore never
    /// repeat across a buyer's carts. No-op unless retired.
    pub fn roll_over_if_retired(&mut self) {
        if self.status == CartStatus::Retired {
            let now = Utc::now();
            *self = Self {
                owner_id: self.owner_id.clone(),
                version: self.version + 1,
                line_items: HashMap::new(),
                shipping_address: None,
                status: CartStatus::Open,
                created_at: now,
                updated_at: now,
            };
        }
    }

    /// Retire the cart after its order is durably recorded.
    ///
    /// # Errors
    ///
    /// `VersionConflict` if the cart is not currently claimed - retiring an
    /// unclaimed cart would mean the orchestration lost its claim.
    pub fn retire(&mut self) -> Result<(), StoreError> {
        if self.status != CartStatus::CheckoutInProgress {
            return Err(StoreError::VersionConflict {
                expected: self.version,
                found: self.version,
            });
        }
        self.status = CartStatus::Retired;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), StoreError> {
        if self.status.is_mutable() {
            Ok(())
        } else {
            Err(StoreError::CartLocked)
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
