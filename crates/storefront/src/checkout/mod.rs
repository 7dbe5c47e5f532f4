//! Checkout orchestration.
//!
//! The orchestrator sequences three independent systems of record - cart
//! claim, external payment authorization, order ledger - without a shared
//! transaction. Consistency comes from ordering and idempotency:
//!
//! 1. the cart claim is the single serialization point (optimistic,
//!    version-checked);
//! 2. the charge carries an idempotency key derived from `(owner, cart
//!    version)`, so retries never double-charge;
//! 3. the order write happens strictly after authorization and is
//!    idempotency-keyed, so retries never double-record;
//! 4. cart retirement comes last - if it fails the order already stands and
//!    the stuck cart is a cleanup concern, not a correctness failure.
//!
//! Re-running a checkout for the same `(owner, version)` after a crash at
//! any point after authorization converges to the same order.

pub mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use devsnippets_core::{
    Address, CartStatus, CurrencyCode, OrderId, OrderStatus, OwnerId, PaymentReference, Price,
};

use crate::gateway::{ChargeApproval, ChargeRequest, GatewayError, PaymentGateway, PaymentMethod};
use crate::models::{Cart, IdempotencyKey, Order};
use crate::store::{CartStore, OrderLedger, StoreError};

/// States of one checkout run, in order. Failure exits release the cart
/// claim and surface a [`CheckoutError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    Initiated,
    Claiming,
    Authorizing,
    Authorized,
    OrderRecorded,
    CartRetired,
    Completed,
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initiated => "initiated",
            Self::Claiming => "claiming",
            Self::Authorizing => "authorizing",
            Self::Authorized => "authorized",
            Self::OrderRecorded => "order_recorded",
            Self::CartRetired => "cart_retired",
            Self::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

/// One checkout request, as validated by the HTTP layer.
#[derive(Debug)]
pub struct CheckoutRequest {
    /// Authenticated buyer.
    pub owner_id: OwnerId,
    /// Cart version the buyer saw; the claim compares against it.
    pub expected_version: u64,
    /// Address for this order; falls back to the cart's stored address.
    pub shipping_address: Option<Address>,
    /// Opaque gateway method token.
    pub payment_method: PaymentMethod,
}

/// Successful checkout result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub amount: Price,
    pub payment_reference: PaymentReference,
    /// Present when the order is recorded but the cart could not be
    /// retired; the order stands regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Receipt {
    fn from_order(order: &Order, warning: Option<String>) -> Self {
        Self {
            order_id: order.order_id().clone(),
            status: order.status(),
            amount: order.amount(),
            payment_reference: order.payment_reference().clone(),
            warning,
        }
    }
}

/// Failure exits of the checkout state machine.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The cart could not be claimed: stale version, competing checkout, or
    /// no cart at all. No side effects were performed.
    #[error("cart claim failed: {0}")]
    ClaimFailed(#[source] StoreError),

    /// Request failed validation; the claim (if taken) was released.
    #[error("{0}")]
    Validation(String),

    /// Terminal gateway refusal. Cart released, no order recorded.
    #[error("charge declined: {reason}")]
    Declined {
        /// Gateway-supplied decline reason.
        reason: String,
    },

    /// Terminal: unusable payment method token. Cart released.
    #[error("payment method rejected: {0}")]
    InvalidMethod(String),

    /// Transient gateway failure that survived the retry budget. Cart
    /// released; the buyer may retry with the same cart version.
    #[error("payment gateway unavailable")]
    GatewayUnavailable {
        /// Suggested client backoff.
        retry_after: Option<Duration>,
    },

    /// The order write survived its retry budget. Recoverable: the charge
    /// is idempotency-keyed, so re-running the checkout converges.
    #[error("order could not be recorded: {0}")]
    RecordFailed(#[source] StoreError),

    /// The orchestration task itself failed.
    #[error("checkout aborted: {0}")]
    Internal(String),
}

/// Drives the checkout state machine over the three component seams.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderLedger>,
    gateway: Arc<dyn PaymentGateway>,
    currency: CurrencyCode,
    shipping_fee: Decimal,
    retry: RetryPolicy,
}

impl CheckoutOrchestrator {
    /// Wire an orchestrator over its three collaborators.
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartStore>,
        orders: Arc<dyn OrderLedger>,
        gateway: Arc<dyn PaymentGateway>,
        currency: CurrencyCode,
        shipping_fee: Decimal,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            carts,
            orders,
            gateway,
            currency,
            shipping_fee,
            retry,
        }
    }

    /// Run one checkout to a terminal state.
    ///
    /// # Errors
    ///
    /// See [`CheckoutError`]; on every failure exit the cart claim has been
    /// released (or was never taken).
    #[instrument(
        skip(self, request),
        fields(owner = %request.owner_id, version = request.expected_version)
    )]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Receipt, CheckoutError> {
        let idempotency_key =
            IdempotencyKey::derive(&request.owner_id, request.expected_version);

        // Replay: a run for this (owner, version) already recorded an order.
        // Return it without touching the gateway again.
        if let Some(order) = self.find_recorded(&idempotency_key).await {
            tracing::info!(order_id = %order.order_id(), "checkout replay, returning recorded order");
            self.finish_retirement(&request.owner_id, request.expected_version)
                .await;
            return Ok(Receipt::from_order(&order, None));
        }

        transition(CheckoutState::Initiated, CheckoutState::Claiming);
        let cart = self.claim_or_reenter(&request).await?;

        // Validate before any money moves; the claim is released on every
        // exit path below.
        if cart.line_items().is_empty() {
            self.release_claim(&request.owner_id).await;
            return Err(CheckoutError::Validation("cart is empty".to_owned()));
        }
        let Some(address) = request
            .shipping_address
            .or_else(|| cart.shipping_address().cloned())
        else {
            self.release_claim(&request.owner_id).await;
            return Err(CheckoutError::Validation(
                "shipping address required before checkout".to_owned(),
            ));
        };

        // From here on the orchestration must reach a terminal state even if
        // the caller disconnects: axum drops handler futures mid-await, and
        // once authorization starts, charged money may be in flight.
        let this = self.clone();
        let payment_method = request.payment_method;
        let handle = tokio::spawn(async move {
            this.authorize_and_record(cart, address, payment_method, idempotency_key)
                .await
        });
        handle
            .await
            .map_err(|e| CheckoutError::Internal(format!("checkout task failed: {e}")))?
    }

    /// Claim the cart, or re-enter a claim left behind by a crashed run.
    ///
    /// A cart stuck in `CheckoutInProgress` at exactly the requested version
    /// is a well-defined re-entry point: the idempotency key makes the
    /// remaining steps safe to re-drive. Any other mismatch is a conflict.
    async fn claim_or_reenter(&self, request: &CheckoutRequest) -> Result<Cart, CheckoutError> {
        match self
            .carts
            .claim_for_checkout(&request.owner_id, request.expected_version)
            .await
        {
            Ok(cart) => Ok(cart),
            Err(StoreError::VersionConflict { .. }) => {
                match self.carts.get(&request.owner_id).await {
                    Ok(cart)
                        if cart.status() == CartStatus::CheckoutInProgress
                            && cart.version() == request.expected_version =>
                    {
                        tracing::info!("re-entering checkout already in progress");
                        Ok(cart)
                    }
                    Ok(cart) => Err(CheckoutError::ClaimFailed(StoreError::VersionConflict {
                        expected: request.expected_version,
                        found: cart.version(),
                    })),
                    Err(e) => Err(CheckoutError::ClaimFailed(e)),
                }
            }
            Err(e) => Err(CheckoutError::ClaimFailed(e)),
        }
    }

    /// Steps 3-6: charge, record, retire, receipt.
    async fn authorize_and_record(
        &self,
        cart: Cart,
        address: Address,
        payment_method: PaymentMethod,
        idempotency_key: IdempotencyKey,
    ) -> Result<Receipt, CheckoutError> {
        transition(CheckoutState::Claiming, CheckoutState::Authorizing);

        let amount = Price::new(cart.subtotal() + self.shipping_fee, self.currency);
        let Some(charge) = ChargeRequest::new(amount, idempotency_key, payment_method) else {
            self.release_claim(cart.owner_id()).await;
            return Err(CheckoutError::Validation(
                "charge amount is not representable in minor units".to_owned(),
            ));
        };

        let approval = match self.charge_with_retry(&charge).await {
            Ok(approval) => approval,
            Err(err) => {
                self.release_claim(cart.owner_id()).await;
                return Err(err);
            }
        };
        transition(CheckoutState::Authorizing, CheckoutState::Authorized);

        let order = Order::from_authorized_cart(&cart, amount, address, approval.payment_reference);
        let order = match self.record_with_retry(order).await {
            Ok(order) => order,
            Err(err) => {
                self.release_claim(cart.owner_id()).await;
                return Err(err);
            }
        };
        transition(CheckoutState::Authorized, CheckoutState::OrderRecorded);
        tracing::info!(
            order_id = %order.order_id(),
            amount = %order.amount(),
            "order recorded"
        );

        let warning = match self.retire_with_retry(cart.owner_id()).await {
            Ok(()) => {
                transition(CheckoutState::OrderRecorded, CheckoutState::CartRetired);
                transition(CheckoutState::CartRetired, CheckoutState::Completed);
                None
            }
            Err(err) => {
                // The order is durable; a stuck cart is cleanup, not failure.
                tracing::error!(
                    error = %err,
                    order_id = %order.order_id(),
                    "cart retirement failed after order was recorded"
                );
                transition(CheckoutState::OrderRecorded, CheckoutState::Completed);
                Some("cart retirement pending; the order is recorded".to_owned())
            }
        };

        Ok(Receipt::from_order(&order, warning))
    }

    /// Charge with bounded exponential backoff on transient failures.
    async fn charge_with_retry(
        &self,
        charge: &ChargeRequest,
    ) -> Result<ChargeApproval, CheckoutError> {
        for attempt in 1..=self.retry.max_attempts() {
            match self.gateway.charge(charge).await {
                Ok(approval) => return Ok(approval),
                Err(GatewayError::Unavailable { retry_after }) => {
                    if !self.retry.has_next(attempt) {
                        return Err(CheckoutError::GatewayUnavailable { retry_after });
                    }
                    let delay = self.retry.delay_after(attempt, retry_after);
                    tracing::warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "gateway unavailable, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(GatewayError::Declined { reason }) => {
                    return Err(CheckoutError::Declined { reason });
                }
                Err(GatewayError::InvalidMethod(message)) => {
                    return Err(CheckoutError::InvalidMethod(message));
                }
            }
        }
        Err(CheckoutError::GatewayUnavailable { retry_after: None })
    }

    /// Record the order, retrying transient store failures. Safe because
    /// ledger creation is idempotent on the key.
    async fn record_with_retry(&self, order: Order) -> Result<Order, CheckoutError> {
        for attempt in 1..=self.retry.max_attempts() {
            match self.orders.create(order.clone()).await {
                Ok(order) => return Ok(order),
                Err(err) if err.is_transient() && self.retry.has_next(attempt) => {
                    let delay = self.retry.delay_after(attempt, None);
                    tracing::warn!(attempt, error = %err, "order write failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(CheckoutError::RecordFailed(err)),
            }
        }
        Err(CheckoutError::RecordFailed(StoreError::Unavailable(
            "retry budget exhausted".to_owned(),
        )))
    }

    /// Retire the cart, retrying transient failures.
    async fn retire_with_retry(&self, owner_id: &OwnerId) -> Result<(), StoreError> {
        for attempt in 1..=self.retry.max_attempts() {
            match self.carts.retire(owner_id).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && self.retry.has_next(attempt) => {
                    let delay = self.retry.delay_after(attempt, None);
                    tracing::warn!(attempt, error = %err, "cart retirement failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::Unavailable("retry budget exhausted".to_owned()))
    }

    /// Look up an already-recorded order for this key. Lookup failures are
    /// logged and treated as "not found" - the ledger's own idempotency
    /// still prevents duplicates downstream.
    async fn find_recorded(&self, key: &IdempotencyKey) -> Option<Order> {
        match self.orders.find_by_idempotency_key(key).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(error = %err, "idempotency lookup failed, proceeding");
                None
            }
        }
    }

    /// Best-effort cleanup on replay: retire the cart if a crashed run left
    /// it claimed at this version.
    async fn finish_retirement(&self, owner_id: &OwnerId, expected_version: u64) {
        match self.carts.get(owner_id).await {
            Ok(cart)
                if cart.status() == CartStatus::CheckoutInProgress
                    && cart.version() == expected_version =>
            {
                if let Err(err) = self.carts.retire(owner_id).await {
                    tracing::warn!(error = %err, "could not retire cart on replay");
                }
            }
            Ok(_) => {}
            Err(StoreError::CartNotFound(_)) => {}
            Err(err) => {
                tracing::warn!(error = %err, "could not inspect cart on replay");
            }
        }
    }

    /// Release the claim on a failure exit. Best effort: the primary error
    /// is what the caller needs to see.
    async fn release_claim(&self, owner_id: &OwnerId) {
        if let Err(err) = self.carts.release(owner_id).await {
            tracing::warn!(error = %err, owner = %owner_id, "failed to release cart claim");
        }
    }

}

fn transition(from: CheckoutState, to: CheckoutState) {
    tracing::debug!(%from, %to, "checkout state transition");
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use devsnippets_core::ProductId;

    use super::*;
    use crate::config::RetryConfig;
    use crate::store::{InMemoryCartStore, InMemoryOrderLedger};

    // =========================================================================
    // Test doubles
    // =========================================================================

    /// Per-call scripted behaviors; once exhausted, the gateway approves.
    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Approve,
        Decline,
        InvalidMethod,
        Unavailable,
    }

    /// Scriptable gateway that honors the external idempotency contract:
    /// once a key has been approved, the same approval is returned for it
    /// without counting as a new real-world charge.
    #[derive(Default)]
    struct ScriptedGateway {
        plan: Mutex<VecDeque<Behavior>>,
        approved: Mutex<HashMap<String, PaymentReference>>,
        calls: AtomicU32,
        real_charges: AtomicU32,
    }

    impl ScriptedGateway {
        fn scripted(plan: impl IntoIterator<Item = Behavior>) -> Arc<Self> {
            Arc::new(Self {
                plan: Mutex::new(plan.into_iter().collect()),
                ..Self::default()
            })
        }

        fn approving() -> Arc<Self> {
            Self::scripted(std::iter::empty::<Behavior>())
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn real_charges(&self) -> u32 {
            self.real_charges.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn charge(&self, request: &ChargeRequest) -> Result<ChargeApproval, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let key = request.idempotency_key().as_str().to_owned();
            if let Some(reference) = self.approved.lock().unwrap().get(&key) {
                return Ok(ChargeApproval {
                    payment_reference: reference.clone(),
                });
            }

            let behavior = self
                .plan
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Behavior::Approve);
            match behavior {
                Behavior::Approve => {
                    let n = self.real_charges.fetch_add(1, Ordering::SeqCst) + 1;
                    let reference = PaymentReference::new(format!("ch_{n}"));
                    self.approved.lock().unwrap().insert(key, reference.clone());
                    Ok(ChargeApproval {
                        payment_reference: reference,
                    })
                }
                Behavior::Decline => Err(GatewayError::Declined {
                    reason: "insufficient funds".to_owned(),
                }),
                Behavior::InvalidMethod => {
                    Err(GatewayError::InvalidMethod("bad token".to_owned()))
                }
                Behavior::Unavailable => Err(GatewayError::Unavailable { retry_after: None }),
            }
        }
    }

    /// Cart store wrapper whose `retire` always fails.
    struct StuckCartStore {
        inner: InMemoryCartStore,
    }

    #[async_trait]
    impl CartStore for StuckCartStore {
        async fn get(&self, owner_id: &OwnerId) -> Result<Cart, StoreError> {
            self.inner.get(owner_id).await
        }

        async fn create(&self, owner_id: &OwnerId) -> Result<Cart, StoreError> {
            self.inner.create(owner_id).await
        }

        async fn upsert_line_item(
            &self,
            owner_id: &OwnerId,
            product_id: ProductId,
            quantity_delta: i64,
            unit_price: Decimal,
        ) -> Result<Cart, StoreError> {
            self.inner
                .upsert_line_item(owner_id, product_id, quantity_delta, unit_price)
                .await
        }

        async fn remove_line_item(
            &self,
            owner_id: &OwnerId,
            product_id: &ProductId,
        ) -> Result<Cart, StoreError> {
            self.inner.remove_line_item(owner_id, product_id).await
        }

        async fn set_shipping_address(
            &self,
            owner_id: &OwnerId,
            address: Address,
        ) -> Result<Cart, StoreError> {
            self.inner.set_shipping_address(owner_id, address).await
        }

        async fn claim_for_checkout(
            &self,
            owner_id: &OwnerId,
            expected_version: u64,
        ) -> Result<Cart, StoreError> {
            self.inner.claim_for_checkout(owner_id, expected_version).await
        }

        async fn retire(&self, _owner_id: &OwnerId) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("cart store down".to_owned()))
        }

        async fn release(&self, owner_id: &OwnerId) -> Result<(), StoreError> {
            self.inner.release(owner_id).await
        }

        async fn delete(&self, owner_id: &OwnerId) -> Result<(), StoreError> {
            self.inner.delete(owner_id).await
        }
    }

    #[tokio::test]
    async fn test_retire_failure_degrades_to_completed_with_warning() {
        let carts = Arc::new(StuckCartStore {
            inner: InMemoryCartStore::new(),
        });
        let orders: Arc<dyn OrderLedger> = Arc::new(InMemoryOrderLedger::new());
        let gateway = ScriptedGateway::approving();
        let orchestrator = CheckoutOrchestrator::new(
            carts.clone(),
            orders.clone(),
            gateway.clone(),
            CurrencyCode::USD,
            dec!(10.00),
            fast_retry(),
        );
        carts
            .upsert_line_item(&owner(), ProductId::new("product-a"), 2, dec!(10.00))
            .await
            .unwrap();

        let receipt = orchestrator.checkout(request(1)).await.unwrap();

        // The order stands; the stuck cart is only a warning.
        assert_eq!(receipt.status, OrderStatus::Paid);
        assert!(receipt.warning.is_some());
        assert_eq!(orders.list_for_owner(&owner()).await.unwrap().len(), 1);
    }

    /// Ledger wrapper that fails its first `failures` create calls.
    struct FlakyLedger {
        inner: InMemoryOrderLedger,
        failures: AtomicU32,
    }

    impl FlakyLedger {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryOrderLedger::new(),
                failures: AtomicU32::new(failures),
            })
        }
    }

    #[async_trait]
    impl OrderLedger for FlakyLedger {
        async fn create(&self, order: Order) -> Result<Order, StoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("ledger down".to_owned()));
            }
            self.inner.create(order).await
        }

        async fn get(&self, order_id: &OrderId) -> Result<Order, StoreError> {
            self.inner.get(order_id).await
        }

        async fn find_by_idempotency_key(
            &self,
            key: &IdempotencyKey,
        ) -> Result<Option<Order>, StoreError> {
            self.inner.find_by_idempotency_key(key).await
        }

        async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Order>, StoreError> {
            self.inner.list_for_owner(owner_id).await
        }

        async fn mark_refunded(&self, order_id: &OrderId) -> Result<Order, StoreError> {
            self.inner.mark_refunded(order_id).await
        }
    }

    // =========================================================================
    // Harness
    // =========================================================================

    struct Harness {
        carts: Arc<InMemoryCartStore>,
        orders: Arc<dyn OrderLedger>,
        gateway: Arc<ScriptedGateway>,
        orchestrator: CheckoutOrchestrator,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        })
    }

    fn harness_with(gateway: Arc<ScriptedGateway>, orders: Arc<dyn OrderLedger>) -> Harness {
        let carts = Arc::new(InMemoryCartStore::new());
        let orchestrator = CheckoutOrchestrator::new(
            carts.clone(),
            orders.clone(),
            gateway.clone(),
            CurrencyCode::USD,
            dec!(10.00),
            fast_retry(),
        );
        Harness {
            carts,
            orders,
            gateway,
            orchestrator,
        }
    }

    fn harness(gateway: Arc<ScriptedGateway>) -> Harness {
        harness_with(gateway, Arc::new(InMemoryOrderLedger::new()))
    }

    fn owner() -> OwnerId {
        OwnerId::new("buyer-1")
    }

    fn address() -> Address {
        Address::parse("1 Ferris Way", None, "Crabville", "90210", "US").unwrap()
    }

    fn request(version: u64) -> CheckoutRequest {
        CheckoutRequest {
            owner_id: owner(),
            expected_version: version,
            shipping_address: Some(address()),
            payment_method: PaymentMethod::new("tok_visa"),
        }
    }

    /// Seed the standard cart: 2 x $10.00 + 1 x $5.00, version ends at 2.
    async fn seed_cart(harness: &Harness) {
        harness
            .carts
            .upsert_line_item(&owner(), ProductId::new("product-a"), 2, dec!(10.00))
            .await
            .unwrap();
        harness
            .carts
            .upsert_line_item(&owner(), ProductId::new("product-b"), 1, dec!(5.00))
            .await
            .unwrap();
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[tokio::test]
    async fn test_happy_path_records_order_and_retires_cart() {
        let harness = harness(ScriptedGateway::approving());
        seed_cart(&harness).await;

        let receipt = harness.orchestrator.checkout(request(2)).await.unwrap();

        // subtotal 25.00 + shipping 10.00
        assert_eq!(receipt.amount.amount, dec!(35.00));
        assert_eq!(receipt.status, OrderStatus::Paid);
        assert_eq!(receipt.payment_reference.as_str(), "ch_1");
        assert!(receipt.warning.is_none());

        let cart = harness.carts.get(&owner()).await.unwrap();
        assert_eq!(cart.status(), CartStatus::Retired);

        let orders = harness.orders.list_for_owner(&owner()).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id(), &receipt.order_id);
    }

    #[tokio::test]
    async fn test_declined_releases_cart_with_original_state() {
        let harness = harness(ScriptedGateway::scripted([Behavior::Decline]));
        seed_cart(&harness).await;

        let err = harness.orchestrator.checkout(request(2)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Declined { .. }));

        // Cart usable again, untouched.
        let cart = harness.carts.get(&owner()).await.unwrap();
        assert_eq!(cart.status(), CartStatus::Open);
        assert_eq!(cart.version(), 2);
        assert_eq!(cart.subtotal(), dec!(25.00));

        // No order without an approved charge.
        assert!(harness.orders.list_for_owner(&owner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_method_is_terminal() {
        let harness = harness(ScriptedGateway::scripted([Behavior::InvalidMethod]));
        seed_cart(&harness).await;

        let err = harness.orchestrator.checkout(request(2)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidMethod(_)));
        assert_eq!(harness.gateway.calls(), 1);

        let cart = harness.carts.get(&owner()).await.unwrap();
        assert_eq!(cart.status(), CartStatus::Open);
    }

    #[tokio::test]
    async fn test_transient_gateway_failures_are_retried() {
        let harness = harness(ScriptedGateway::scripted([
            Behavior::Unavailable,
            Behavior::Unavailable,
            Behavior::Approve,
        ]));
        seed_cart(&harness).await;

        let receipt = harness.orchestrator.checkout(request(2)).await.unwrap();
        assert_eq!(harness.gateway.calls(), 3);
        assert_eq!(harness.gateway.real_charges(), 1);
        assert_eq!(receipt.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_gateway_exhaustion_surfaces_recoverable_error() {
        let harness = harness(ScriptedGateway::scripted(
            std::iter::repeat_n(Behavior::Unavailable, 10).collect::<Vec<_>>(),
        ));
        seed_cart(&harness).await;

        let err = harness.orchestrator.checkout(request(2)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::GatewayUnavailable { .. }));
        // Bounded: exactly the attempt budget, then stop.
        assert_eq!(harness.gateway.calls(), 5);

        let cart = harness.carts.get(&owner()).await.unwrap();
        assert_eq!(cart.status(), CartStatus::Open);
        assert!(harness.orders.list_for_owner(&owner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_charge_without_claim() {
        let harness = harness(ScriptedGateway::approving());
        seed_cart(&harness).await;

        // Stale version: the claim loses, the gateway must never be called.
        let err = harness.orchestrator.checkout(request(1)).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::ClaimFailed(StoreError::VersionConflict { .. })
        ));
        assert_eq!(harness.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_checkout_of_missing_cart_fails_without_side_effects() {
        let harness = harness(ScriptedGateway::approving());

        let err = harness.orchestrator.checkout(request(0)).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::ClaimFailed(StoreError::CartNotFound(_))
        ));
        assert_eq!(harness.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected_and_released() {
        let harness = harness(ScriptedGateway::approving());
        harness.carts.create(&owner()).await.unwrap();

        let err = harness.orchestrator.checkout(request(0)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let cart = harness.carts.get(&owner()).await.unwrap();
        assert_eq!(cart.status(), CartStatus::Open);
        assert_eq!(harness.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_address_is_rejected_and_released() {
        let harness = harness(ScriptedGateway::approving());
        seed_cart(&harness).await;

        let mut req = request(2);
        req.shipping_address = None;
        let err = harness.orchestrator.checkout(req).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let cart = harness.carts.get(&owner()).await.unwrap();
        assert_eq!(cart.status(), CartStatus::Open);
        assert_eq!(harness.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_cart_address_is_used_when_request_has_none() {
        let harness = harness(ScriptedGateway::approving());
        seed_cart(&harness).await;
        harness
            .carts
            .set_shipping_address(&owner(), address())
            .await
            .unwrap();

        let mut req = request(3);
        req.shipping_address = None;
        let receipt = harness.orchestrator.checkout(req).await.unwrap();
        assert_eq!(receipt.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_transient_record_failure_is_retried() {
        let gateway = ScriptedGateway::approving();
        let harness = harness_with(gateway, FlakyLedger::failing(2));
        seed_cart(&harness).await;

        let receipt = harness.orchestrator.checkout(request(2)).await.unwrap();
        assert_eq!(receipt.status, OrderStatus::Paid);
        assert_eq!(harness.orders.list_for_owner(&owner()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_exhaustion_releases_cart_and_converges_on_retry() {
        let gateway = ScriptedGateway::approving();
        // 8 ledger failures: the first run burns its whole 5-attempt budget,
        // the second run fails 3 more times and then lands the write.
        let harness = harness_with(gateway, FlakyLedger::failing(8));
        seed_cart(&harness).await;

        // First run: charge approved, order write exhausted its budget.
        let err = harness.orchestrator.checkout(request(2)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::RecordFailed(_)));
        assert_eq!(harness.gateway.real_charges(), 1);
        let cart = harness.carts.get(&owner()).await.unwrap();
        assert_eq!(cart.status(), CartStatus::Open);

        let receipt = harness.orchestrator.checkout(request(2)).await.unwrap();

        // The gateway saw the same idempotency key: one real charge total.
        assert_eq!(harness.gateway.real_charges(), 1);
        assert_eq!(receipt.payment_reference.as_str(), "ch_1");
        assert_eq!(harness.orders.list_for_owner(&owner()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_checkout_replays_recorded_order() {
        let harness = harness(ScriptedGateway::approving());
        seed_cart(&harness).await;

        let first = harness.orchestrator.checkout(request(2)).await.unwrap();
        let second = harness.orchestrator.checkout(request(2)).await.unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(harness.gateway.real_charges(), 1);
        assert_eq!(harness.orders.list_for_owner(&owner()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reentry_after_crash_between_charge_and_record() {
        let harness = harness(ScriptedGateway::approving());
        seed_cart(&harness).await;

        // Simulate a crashed run that charged but never recorded: the cart
        // is stuck claimed and the gateway already approved the key.
        harness.carts.claim_for_checkout(&owner(), 2).await.unwrap();
        let key = IdempotencyKey::derive(&owner(), 2);
        let probe = ChargeRequest::new(
            Price::usd(dec!(35.00)),
            key,
            PaymentMethod::new("tok_visa"),
        )
        .unwrap();
        harness.gateway.charge(&probe).await.unwrap();
        assert_eq!(harness.gateway.real_charges(), 1);

        // Re-running the checkout converges: same reference, one order.
        let receipt = harness.orchestrator.checkout(request(2)).await.unwrap();
        assert_eq!(receipt.payment_reference.as_str(), "ch_1");
        assert_eq!(harness.gateway.real_charges(), 1);
        assert_eq!(harness.orders.list_for_owner(&owner()).await.unwrap().len(), 1);

        let cart = harness.carts.get(&owner()).await.unwrap();
        assert_eq!(cart.status(), CartStatus::Retired);
    }

    #[tokio::test]
    async fn test_conflicting_version_during_inflight_checkout_is_conflict() {
        let harness = harness(ScriptedGateway::approving());
        seed_cart(&harness).await;
        harness.carts.claim_for_checkout(&owner(), 2).await.unwrap();

        // A different expected version is a genuine conflict, not re-entry.
        let err = harness.orchestrator.checkout(request(1)).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::ClaimFailed(StoreError::VersionConflict { .. })
        ));
        assert_eq!(harness.gateway.calls(), 0);
    }
}
