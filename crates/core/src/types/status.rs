//! Status enums for carts and orders.

use serde::{Deserialize, Serialize};

/// Cart lifecycle status.
///
/// A cart is `Open` while the buyer mutates it, `CheckoutInProgress` while a
/// checkout orchestration holds the claim, and `Retired` once an order has
/// been recorded for it. Claimed carts reject line-item mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CartStatus {
    #[default]
    Open,
    CheckoutInProgress,
    Retired,
}

impl CartStatus {
    /// Whether buyer mutations are currently allowed.
    #[must_use]
    pub const fn is_mutable(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Order payment status.
///
/// Forward-only: `Paid` may advance to `Refunded`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Paid,
    Refunded,
}
