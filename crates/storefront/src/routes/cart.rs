//! Cart route handlers.
//!
//! Carts are keyed by owner: one open cart per buyer, addressed as
//! `/cart/{ownerId}`. Mutations are line-item level operations guarded by
//! the cart's version token, not whole-document replacement - concurrent
//! updates conflict instead of silently losing writes.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::instrument;

use devsnippets_core::{Address, OwnerId, ProductId};

use crate::error::{AppError, Result};
use crate::middleware::AuthenticatedOwner;
use crate::state::{AppState, validate_unit_price};

/// One line-item-level cart mutation.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CartMutation {
    /// Apply a quantity delta; creates the line (or the cart) if absent,
    /// removes the line when the quantity reaches zero.
    UpsertItem {
        product_id: ProductId,
        quantity_delta: i64,
        unit_price: Decimal,
    },
    /// Drop a line entirely.
    RemoveItem { product_id: ProductId },
    /// Set or replace the shipping address.
    SetShippingAddress { address: Address },
}

/// Create the caller's cart (idempotent: an existing open cart is returned).
#[instrument(skip(state, owner))]
pub async fn create(
    State(state): State<AppState>,
    owner: AuthenticatedOwner,
) -> Result<impl IntoResponse> {
    let cart = state.carts().create(&owner.0).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

/// Fetch a cart; 404 if the buyer has none.
#[instrument(skip(state, owner))]
pub async fn show(
    State(state): State<AppState>,
    owner: AuthenticatedOwner,
    Path(owner_id): Path<OwnerId>,
) -> Result<impl IntoResponse> {
    owner.authorize(&owner_id)?;
    let cart = state.carts().get(&owner_id).await?;
    Ok(Json(cart))
}

/// Apply one mutation to the cart. 409 while a checkout holds the claim.
#[instrument(skip(state, owner, mutation))]
pub async fn update(
    State(state): State<AppState>,
    owner: AuthenticatedOwner,
    Path(owner_id): Path<OwnerId>,
    Json(mutation): Json<CartMutation>,
) -> Result<impl IntoResponse> {
    owner.authorize(&owner_id)?;

    let cart = match mutation {
        CartMutation::UpsertItem {
            product_id,
            quantity_delta,
            unit_price,
        } => {
            let unit_price = validate_unit_price(unit_price).map_err(AppError::Validation)?;
            state
                .carts()
                .upsert_line_item(&owner_id, product_id, quantity_delta, unit_price)
                .await?
        }
        CartMutation::RemoveItem { product_id } => {
            state.carts().remove_line_item(&owner_id, &product_id).await?
        }
        CartMutation::SetShippingAddress { address } => {
            address
                .validate()
                .map_err(|e| AppError::Validation(e.to_string()))?;
            state.carts().set_shipping_address(&owner_id, address).await?
        }
    };

    Ok(Json(cart))
}

/// Explicitly discard the cart.
#[instrument(skip(state, owner))]
pub async fn discard(
    State(state): State<AppState>,
    owner: AuthenticatedOwner,
    Path(owner_id): Path<OwnerId>,
) -> Result<impl IntoResponse> {
    owner.authorize(&owner_id)?;
    state.carts().delete(&owner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
