//! Checkout route handler.
//!
//! Thin HTTP shell over [`crate::checkout::CheckoutOrchestrator`]: validate
//! the request, hand it to the state machine, map the outcome to the wire.

use axum::{Json, extract::State, response::IntoResponse};
use serde::Deserialize;
use tracing::instrument;

use devsnippets_core::{Address, OwnerId};

use crate::checkout::CheckoutRequest;
use crate::error::{AppError, Result};
use crate::gateway::PaymentMethod;
use crate::middleware::AuthenticatedOwner;
use crate::state::AppState;

/// Checkout request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    /// Cart to check out (carts are keyed by owner).
    pub cart_id: OwnerId,
    /// Version the buyer last saw; the claim compares against it.
    pub expected_version: u64,
    /// Address for this order; falls back to the cart's stored address.
    #[serde(default)]
    pub shipping_address: Option<Address>,
    /// Opaque gateway method token.
    pub payment_method: String,
}

/// Run one checkout.
///
/// Responses: `200` receipt, `400` validation, `402` declined or bad
/// method, `409` version conflict, `503` gateway unavailable (with
/// `retryAfter`).
#[instrument(skip(state, owner, body), fields(version = body.expected_version))]
pub async fn checkout(
    State(state): State<AppState>,
    owner: AuthenticatedOwner,
    Json(body): Json<CheckoutBody>,
) -> Result<impl IntoResponse> {
    owner.authorize(&body.cart_id)?;

    // Reject malformed input before the claim: no side effects on 400.
    if body.payment_method.trim().is_empty() {
        return Err(AppError::Validation("paymentMethod is required".to_owned()));
    }
    if let Some(address) = &body.shipping_address {
        address
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
    }

    let receipt = state
        .checkout()
        .checkout(CheckoutRequest {
            owner_id: body.cart_id,
            expected_version: body.expected_version,
            shipping_address: body.shipping_address,
            payment_method: PaymentMethod::new(body.payment_method),
        })
        .await?;

    Ok(Json(receipt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_body_wire_format() {
        let body: CheckoutBody = serde_json::from_value(serde_json::json!({
            "cartId": "buyer-1",
            "expectedVersion": 3,
            "paymentMethod": "tok_visa",
        }))
        .unwrap();
        assert_eq!(body.cart_id, OwnerId::new("buyer-1"));
        assert_eq!(body.expected_version, 3);
        assert!(body.shipping_address.is_none());
    }
}
