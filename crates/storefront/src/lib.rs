//! DevSnippets storefront library.
//!
//! Sells digital goods: buyers accumulate line items in a cart, then check
//! out. Checkout authorizes a payment with an external gateway, durably
//! records an order, and retires the cart - tolerating partial failure at
//! every step. See [`checkout`] for the orchestration design.
//!
//! # Architecture
//!
//! - Axum web framework, camelCase JSON wire format
//! - [`store`] - cart store + order ledger behind async traits
//! - [`gateway`] - payment gateway capability boundary
//! - [`checkout`] - the saga that keeps the three consistent
//!
//! Catalog, registration, and rendering are external collaborators; this
//! service owns only carts, orders, and the orchestration between them.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod checkout;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
