//! Application state shared across handlers.

use std::sync::Arc;

use rust_decimal::Decimal;

use devsnippets_core::CurrencyCode;

use crate::checkout::{CheckoutOrchestrator, RetryPolicy};
use crate::config::StorefrontConfig;
use crate::gateway::{HttpPaymentGateway, PaymentGateway};
use crate::store::{CartStore, InMemoryCartStore, InMemoryOrderLedger, OrderLedger};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// three component seams plus the orchestrator wired over them.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    currency: CurrencyCode,
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderLedger>,
    checkout: CheckoutOrchestrator,
}

impl AppState {
    /// Create application state from configuration, wiring the HTTP payment
    /// gateway and in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway HTTP client cannot be constructed.
    pub fn new(config: &StorefrontConfig) -> Result<Self, reqwest::Error> {
        let gateway = Arc::new(HttpPaymentGateway::new(&config.gateway)?);
        Ok(Self::with_components(
            config,
            Arc::new(InMemoryCartStore::new()),
            Arc::new(InMemoryOrderLedger::new()),
            gateway,
        ))
    }

    /// Wire state over explicit component implementations.
    ///
    /// Tests inject scripted gateways and flaky stores through here; the
    /// production path goes through [`Self::new`].
    #[must_use]
    pub fn with_components(
        config: &StorefrontConfig,
        carts: Arc<dyn CartStore>,
        orders: Arc<dyn OrderLedger>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let checkout = CheckoutOrchestrator::new(
            carts.clone(),
            orders.clone(),
            gateway,
            config.currency,
            config.shipping_fee,
            RetryPolicy::new(config.retry),
        );

        Self {
            inner: Arc::new(AppStateInner {
                currency: config.currency,
                carts,
                orders,
                checkout,
            }),
        }
    }

    /// Store currency.
    #[must_use]
    pub fn currency(&self) -> CurrencyCode {
        self.inner.currency
    }

    /// Get a reference to the cart store.
    #[must_use]
    pub fn carts(&self) -> &dyn CartStore {
        self.inner.carts.as_ref()
    }

    /// Get a reference to the order ledger.
    #[must_use]
    pub fn orders(&self) -> &dyn OrderLedger {
        self.inner.orders.as_ref()
    }

    /// Get a reference to the checkout orchestrator.
    #[must_use]
    pub fn checkout(&self) -> &CheckoutOrchestrator {
        &self.inner.checkout
    }
}

/// Maximum unit-price scale accepted at the API boundary, in decimal places.
/// Everything the store charges must be representable in minor units.
pub const MAX_PRICE_SCALE: u32 = 2;

/// Validate a unit price from the wire: non-negative, minor-unit precision.
///
/// # Errors
///
/// Returns a human-readable message for the 400 response.
pub fn validate_unit_price(price: Decimal) -> Result<Decimal, String> {
    if price.is_sign_negative() {
        return Err("unitPrice must not be negative".to_owned());
    }
    if price.scale() > MAX_PRICE_SCALE {
        return Err(format!(
            "unitPrice must have at most {MAX_PRICE_SCALE} decimal places"
        ));
    }
    Ok(price)
}
