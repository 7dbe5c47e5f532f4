//! Integration test harness for DevSnippets.
//!
//! Builds the full storefront router over in-memory stores and a scripted
//! payment gateway, then drives it request-by-request with
//! `tower::ServiceExt::oneshot` - no sockets, no external services.
//!
//! The scripted gateway honors the external idempotency contract (same key
//! and amount produce one real-world charge and the same outcome), which is
//! what the checkout convergence scenarios exercise.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use secrecy::SecretString;
use tower::util::ServiceExt;
use url::Url;

use devsnippets_core::{CurrencyCode, PaymentReference};
use devsnippets_storefront::config::{PaymentGatewayConfig, RetryConfig, StorefrontConfig};
use devsnippets_storefront::gateway::{
    ChargeApproval, ChargeRequest, GatewayError, PaymentGateway,
};
use devsnippets_storefront::routes;
use devsnippets_storefront::state::AppState;
use devsnippets_storefront::store::{InMemoryCartStore, InMemoryOrderLedger};

use rust_decimal_macros::dec;

/// One scripted gateway outcome, consumed per charge call. Once the plan is
/// exhausted, the gateway approves.
#[derive(Debug, Clone, Copy)]
pub enum GatewayBehavior {
    Approve,
    Decline,
    InvalidMethod,
    Unavailable,
}

/// Scriptable gateway double enforcing the same-key-same-outcome contract.
#[derive(Default)]
pub struct ScriptedGateway {
    plan: Mutex<VecDeque<GatewayBehavior>>,
    approved: Mutex<HashMap<String, PaymentReference>>,
    calls: AtomicU32,
    real_charges: AtomicU32,
}

impl ScriptedGateway {
    /// Total charge calls observed, including idempotent replays.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Charges that actually moved money (first approval per key).
    #[must_use]
    pub fn real_charges(&self) -> u32 {
        self.real_charges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeApproval, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let key = request.idempotency_key().as_str().to_owned();
        if let Some(reference) = self.approved.lock().expect("gateway mutex").get(&key) {
            return Ok(ChargeApproval {
                payment_reference: reference.clone(),
            });
        }

        let behavior = self
            .plan
            .lock()
            .expect("gateway mutex")
            .pop_front()
            .unwrap_or(GatewayBehavior::Approve);
        match behavior {
            GatewayBehavior::Approve => {
                let n = self.real_charges.fetch_add(1, Ordering::SeqCst) + 1;
                let reference = PaymentReference::new(format!("ch_{n}"));
                self.approved
                    .lock()
                    .expect("gateway mutex")
                    .insert(key, reference.clone());
                Ok(ChargeApproval {
                    payment_reference: reference,
                })
            }
            GatewayBehavior::Decline => Err(GatewayError::Declined {
                reason: "insufficient funds".to_owned(),
            }),
            GatewayBehavior::InvalidMethod => {
                Err(GatewayError::InvalidMethod("unusable token".to_owned()))
            }
            GatewayBehavior::Unavailable => Err(GatewayError::Unavailable { retry_after: None }),
        }
    }
}

/// Fully wired storefront under test.
pub struct TestContext {
    router: Router,
    /// Direct handle to the cart store for arranging test fixtures.
    pub carts: Arc<InMemoryCartStore>,
    /// Direct handle to the order ledger.
    pub orders: Arc<InMemoryOrderLedger>,
    /// The scripted gateway behind the orchestrator.
    pub gateway: Arc<ScriptedGateway>,
}

impl TestContext {
    /// Context whose gateway approves every charge.
    #[must_use]
    pub fn new() -> Self {
        Self::with_gateway_plan([])
    }

    /// Context with scripted gateway behaviors, consumed one per charge.
    #[must_use]
    pub fn with_gateway_plan(plan: impl IntoIterator<Item = GatewayBehavior>) -> Self {
        let config = test_config();
        let carts = Arc::new(InMemoryCartStore::new());
        let orders = Arc::new(InMemoryOrderLedger::new());
        let gateway = Arc::new(ScriptedGateway {
            plan: Mutex::new(plan.into_iter().collect()),
            ..ScriptedGateway::default()
        });

        let state = AppState::with_components(
            &config,
            carts.clone(),
            orders.clone(),
            gateway.clone(),
        );
        let router = routes::routes().with_state(state);

        Self {
            router,
            carts,
            orders,
            gateway,
        }
    }

    /// Send one request; returns status and parsed JSON body (or `Null` for
    /// empty bodies).
    ///
    /// # Panics
    ///
    /// Panics on malformed requests or non-JSON response bodies; tests want
    /// loud failures.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        bearer: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request build"),
            None => builder.body(Body::empty()).expect("request build"),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router never errors");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collect")
            .to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    /// Seed the standard test cart over the API: 2 x $10.00 + 1 x $5.00.
    /// Leaves the cart at version 2.
    pub async fn seed_standard_cart(&self, owner: &str) {
        let (status, _) = self
            .request(
                "PUT",
                &format!("/cart/{owner}"),
                Some(owner),
                Some(serde_json::json!({
                    "op": "upsertItem",
                    "productId": "rust-macro-pack",
                    "quantityDelta": 2,
                    "unitPrice": "10.00",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = self
            .request(
                "PUT",
                &format!("/cart/{owner}"),
                Some(owner),
                Some(serde_json::json!({
                    "op": "upsertItem",
                    "productId": "sorting-visualizer",
                    "quantityDelta": 1,
                    "unitPrice": "5.00",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    /// A well-formed checkout body for the standard cart.
    #[must_use]
    pub fn checkout_body(owner: &str, expected_version: u64) -> serde_json::Value {
        serde_json::json!({
            "cartId": owner,
            "expectedVersion": expected_version,
            "shippingAddress": {
                "line1": "1 Ferris Way",
                "city": "Crabville",
                "postalCode": "90210",
                "country": "US",
            },
            "paymentMethod": "tok_visa",
        })
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Config for tests: tiny backoff so retry-exhaustion scenarios stay fast.
fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        host: "127.0.0.1".parse().expect("loopback parses"),
        port: 0,
        currency: CurrencyCode::USD,
        shipping_fee: dec!(10.00),
        gateway: PaymentGatewayConfig {
            endpoint: Url::parse("https://gateway.invalid").expect("url parses"),
            secret_key: SecretString::from("sk_aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6"),
            request_timeout: Duration::from_secs(1),
        },
        retry: RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        },
        sentry_dsn: None,
    }
}
