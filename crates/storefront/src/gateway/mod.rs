//! Payment gateway capability boundary.
//!
//! The orchestrator only ever sees the [`PaymentGateway`] trait and its
//! tagged outcome: approved, declined, bad method, or unavailable. The
//! external service guarantees that two charges with the same idempotency
//! key and amount produce one real-world charge and the same outcome; the
//! orchestrator leans on that guarantee to make crash-retries safe.

pub mod http;

pub use http::HttpPaymentGateway;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use devsnippets_core::{PaymentReference, Price};

use crate::models::IdempotencyKey;

/// Opaque payment method token supplied by the buyer (e.g. a tokenized
/// card). The gateway decides whether it is usable; we never inspect it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(transparent)]
pub struct PaymentMethod(String);

impl PaymentMethod {
    /// Wrap a raw method token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A charge authorization request.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    amount: Price,
    amount_minor: i64,
    idempotency_key: IdempotencyKey,
    payment_method: PaymentMethod,
}

impl ChargeRequest {
    /// Build a request, converting the amount to the currency's minor unit
    /// up front. Returns `None` if the amount cannot be represented (more
    /// precision than the minor unit, or out of range) - callers validate
    /// prices at the API boundary so this is a should-not-happen guard.
    #[must_use]
    pub fn new(
        amount: Price,
        idempotency_key: IdempotencyKey,
        payment_method: PaymentMethod,
    ) -> Option<Self> {
        let amount_minor = amount.minor_units()?;
        Some(Self {
            amount,
            amount_minor,
            idempotency_key,
            payment_method,
        })
    }

    /// Amount in the currency's standard unit.
    #[must_use]
    pub const fn amount(&self) -> Price {
        self.amount
    }

    /// Amount in minor units (cents for USD), as gateways charge.
    #[must_use]
    pub const fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    /// Exactly-once token forwarded to the gateway.
    #[must_use]
    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    /// Buyer-supplied method token.
    #[must_use]
    pub fn payment_method(&self) -> &PaymentMethod {
        &self.payment_method
    }
}

/// A successful authorization.
#[derive(Debug, Clone)]
pub struct ChargeApproval {
    /// Gateway reference for the charge (e.g. `ch_123`).
    pub payment_reference: PaymentReference,
}

/// Failure outcomes of a charge attempt.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Terminal: the gateway refused the charge. Surfaced to the buyer, no
    /// retry.
    #[error("charge declined: {reason}")]
    Declined {
        /// Gateway-supplied decline reason.
        reason: String,
    },

    /// Terminal: the payment method token is unusable. User input error.
    #[error("invalid payment method: {0}")]
    InvalidMethod(String),

    /// Transient: timeout, 5xx, rate limit, or transport failure. Safe to
    /// retry with the same idempotency key.
    #[error("gateway unavailable")]
    Unavailable {
        /// Server-suggested backoff, when the gateway provided one.
        retry_after: Option<Duration>,
    },
}

impl GatewayError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Capability boundary to the external charge-authorization service.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Authorize a charge.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`] for the outcome taxonomy.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeApproval, GatewayError>;
}
