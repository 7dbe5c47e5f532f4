//! HTTP payment gateway adapter.
//!
//! Speaks a Stripe-shaped JSON charge API: bearer-authenticated `POST
//! /v1/charges` with the idempotency key in a header and the amount in
//! minor units. All transport-level failures map to
//! [`GatewayError::Unavailable`] - with the idempotency key attached, an
//! ambiguous outcome is safe to retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devsnippets_core::PaymentReference;

use crate::config::PaymentGatewayConfig;
use crate::gateway::{ChargeApproval, ChargeRequest, GatewayError, PaymentGateway};

/// Client for the external charge-authorization service.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    inner: Arc<HttpPaymentGatewayInner>,
}

struct HttpPaymentGatewayInner {
    client: reqwest::Client,
    charges_url: String,
    secret_key: secrecy::SecretString,
}

#[derive(Serialize)]
struct ChargeBody<'a> {
    amount: i64,
    currency: &'a str,
    source: &'a str,
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
}

#[derive(Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ApiError,
}

#[derive(Deserialize, Default)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    fn message_or(&self, fallback: &str) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| fallback.to_owned())
    }
}

impl HttpPaymentGateway {
    /// Create a gateway client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let charges_url = format!("{}/v1/charges", config.endpoint.as_str().trim_end_matches('/'));

        Ok(Self {
            inner: Arc::new(HttpPaymentGatewayInner {
                client,
                charges_url,
                secret_key: config.secret_key.clone(),
            }),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key()))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeApproval, GatewayError> {
        let body = ChargeBody {
            amount: request.amount_minor(),
            currency: request.amount().currency_code.code(),
            source: request.payment_method().as_str(),
        };

        let response = self
            .inner
            .client
            .post(&self.inner.charges_url)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .header("Idempotency-Key", request.idempotency_key().as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "gateway request failed in transport");
                GatewayError::Unavailable { retry_after: None }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(GatewayError::Unavailable { retry_after });
        }

        // Body as text first for better diagnostics on malformed replies.
        let response_text = response.text().await.map_err(|e| {
            tracing::warn!(error = %e, "failed reading gateway response body");
            GatewayError::Unavailable { retry_after: None }
        })?;

        if status.is_server_error() {
            tracing::warn!(
                status = %status,
                body = %response_text.chars().take(200).collect::<String>(),
                "gateway returned server error"
            );
            return Err(GatewayError::Unavailable { retry_after: None });
        }

        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            let envelope: ErrorEnvelope =
                serde_json::from_str(&response_text).unwrap_or_default();
            return Err(GatewayError::Declined {
                reason: envelope.error.message_or("card declined"),
            });
        }

        if status.is_client_error() {
            let envelope: ErrorEnvelope =
                serde_json::from_str(&response_text).unwrap_or_default();
            // The gateway distinguishes unusable method tokens from other
            // client errors by code.
            if matches!(
                envelope.error.code.as_deref(),
                Some("invalid_source" | "invalid_payment_method")
            ) {
                return Err(GatewayError::InvalidMethod(
                    envelope.error.message_or("payment method rejected"),
                ));
            }
            tracing::error!(
                status = %status,
                body = %response_text.chars().take(200).collect::<String>(),
                "gateway rejected charge request"
            );
            return Err(GatewayError::Declined {
                reason: envelope.error.message_or("charge rejected"),
            });
        }

        let parsed: ChargeResponse = serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %response_text.chars().take(200).collect::<String>(),
                "failed to parse gateway approval"
            );
            // Outcome unknown; the idempotency key makes a retry safe.
            GatewayError::Unavailable { retry_after: None }
        })?;

        Ok(ChargeApproval {
            payment_reference: PaymentReference::new(parsed.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_tolerates_unknown_shapes() {
        let envelope: ErrorEnvelope = serde_json::from_str("{}").unwrap_or_default();
        assert_eq!(envelope.error.message_or("fallback"), "fallback");

        let envelope: ErrorEnvelope = serde_json::from_str(
            r#"{"error": {"code": "card_declined", "message": "insufficient funds"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.error.code.as_deref(), Some("card_declined"));
        assert_eq!(envelope.error.message_or("x"), "insufficient funds");
    }

    #[test]
    fn test_charge_body_shape() {
        let body = ChargeBody {
            amount: 3500,
            currency: "USD",
            source: "tok_visa",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["amount"], 3500);
        assert_eq!(json["currency"], "USD");
        assert_eq!(json["source"], "tok_visa");
    }
}
