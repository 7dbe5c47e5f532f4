//! Order route handlers.
//!
//! Orders are read-mostly: the ledger is written by the checkout
//! orchestration, and the only mutation exposed here is the forward-only
//! refund transition.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::instrument;

use devsnippets_core::{OrderId, OwnerId};

use crate::error::{AppError, Result};
use crate::middleware::AuthenticatedOwner;
use crate::state::AppState;

/// List the caller's orders, newest first.
#[instrument(skip(state, owner))]
pub async fn list(
    State(state): State<AppState>,
    owner: AuthenticatedOwner,
    Path(owner_id): Path<OwnerId>,
) -> Result<impl IntoResponse> {
    owner.authorize(&owner_id)?;
    let orders = state.orders().list_for_owner(&owner_id).await?;
    Ok(Json(orders))
}

/// Fetch one order.
#[instrument(skip(state, owner))]
pub async fn show(
    State(state): State<AppState>,
    owner: AuthenticatedOwner,
    Path((owner_id, order_id)): Path<(OwnerId, OrderId)>,
) -> Result<impl IntoResponse> {
    owner.authorize(&owner_id)?;
    let order = state.orders().get(&order_id).await?;
    if order.owner_id() != &owner_id {
        // Do not leak other buyers' order ids.
        return Err(AppError::NotFound(format!("order {order_id}")));
    }
    Ok(Json(order))
}

/// Refund an order. Forward-only; 409 once already refunded.
#[instrument(skip(state, owner))]
pub async fn refund(
    State(state): State<AppState>,
    owner: AuthenticatedOwner,
    Path((owner_id, order_id)): Path<(OwnerId, OrderId)>,
) -> Result<impl IntoResponse> {
    owner.authorize(&owner_id)?;

    let order = state.orders().get(&order_id).await?;
    if order.owner_id() != &owner_id {
        return Err(AppError::NotFound(format!("order {order_id}")));
    }

    let refunded = state.orders().mark_refunded(&order_id).await?;
    tracing::info!(order_id = %order_id, "order refunded");
    Ok(Json(refunded))
}
