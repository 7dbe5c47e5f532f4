//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                       - Liveness check
//! GET  /health/ready                 - Readiness check
//!
//! # Cart (bearer identity required)
//! POST   /cart                       - Create (or return) the caller's cart
//! GET    /cart/{ownerId}             - Fetch cart; 404 if none
//! PUT    /cart/{ownerId}             - Mutate line items / address; 409 while claimed
//! DELETE /cart/{ownerId}             - Explicit discard; 409 while claimed
//!
//! # Checkout
//! POST /checkout                     - Run the checkout orchestration
//!
//! # Orders
//! GET  /orders/{ownerId}             - List the caller's orders, newest first
//! GET  /orders/{ownerId}/{orderId}   - Fetch one order
//! POST /orders/{ownerId}/{orderId}/refund - Forward-only refund
//! ```

pub mod cart;
pub mod checkout;
pub mod orders;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new().route("/", post(cart::create)).route(
        "/{owner_id}",
        get(cart::show).put(cart::update).delete(cart::discard),
    )
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/{owner_id}", get(orders::list))
        .route("/{owner_id}/{order_id}", get(orders::show))
        .route("/{owner_id}/{order_id}/refund", post(orders::refund))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        // Cart routes
        .nest("/cart", cart_routes())
        // Checkout orchestration
        .route("/checkout", post(checkout::checkout))
        // Order routes
        .nest("/orders", order_routes())
}
