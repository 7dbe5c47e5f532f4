//! Core types for DevSnippets.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod address;
pub mod id;
pub mod price;
pub mod status;

pub use address::{Address, AddressError};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use status::*;
