//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Responses carry a machine-readable camelCase `reason` plus a human
//! `message`; 5xx responses never expose internal detail.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::checkout::CheckoutError;
use crate::store::StoreError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Cart store or order ledger operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Checkout orchestration failed.
    #[error("checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Bad request from client.
    #[error("validation error: {0}")]
    Validation(String),

    /// No authenticated identity on the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated identity does not own the addressed resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    reason: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl AppError {
    fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Internal(_)
                | Self::Store(StoreError::Unavailable(_))
                | Self::Checkout(CheckoutError::Internal(_))
                | Self::Checkout(CheckoutError::ClaimFailed(StoreError::Unavailable(_)))
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Store(err) => store_status(err),
            Self::Checkout(err) => match err {
                CheckoutError::ClaimFailed(inner) => store_status(inner),
                CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
                CheckoutError::Declined { .. } | CheckoutError::InvalidMethod(_) => {
                    StatusCode::PAYMENT_REQUIRED
                }
                CheckoutError::GatewayUnavailable { .. } | CheckoutError::RecordFailed(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                CheckoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        // Don't expose internal error details to clients
        if self.is_server_error() {
            return ErrorBody {
                reason: "internal",
                message: "internal server error".to_owned(),
                retry_after: None,
            };
        }

        let (reason, retry_after) = match self {
            Self::Store(err) | Self::Checkout(CheckoutError::ClaimFailed(err)) => {
                (store_reason(err), None)
            }
            Self::Checkout(err) => match err {
                CheckoutError::Validation(_) => ("validation", None),
                CheckoutError::Declined { .. } => ("declined", None),
                CheckoutError::InvalidMethod(_) => ("invalidPaymentMethod", None),
                CheckoutError::GatewayUnavailable { retry_after } => (
                    "gatewayUnavailable",
                    Some(retry_after.map_or(1, |d| d.as_secs().max(1))),
                ),
                CheckoutError::RecordFailed(_) => ("orderRecordUnavailable", Some(1)),
                // is_server_error() handled ClaimFailed/Internal above
                _ => ("internal", None),
            },
            Self::Validation(_) => ("validation", None),
            Self::Unauthorized(_) => ("unauthorized", None),
            Self::Forbidden(_) => ("forbidden", None),
            Self::NotFound(_) => ("notFound", None),
            Self::Internal(_) => ("internal", None),
        };

        ErrorBody {
            reason,
            message: self.to_string(),
            retry_after,
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::CartNotFound(_) | StoreError::OrderNotFound(_) | StoreError::LineNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        StoreError::CartLocked
        | StoreError::VersionConflict { .. }
        | StoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
        StoreError::InvalidQuantity { .. } => StatusCode::BAD_REQUEST,
        StoreError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_reason(err: &StoreError) -> &'static str {
    match err {
        StoreError::CartNotFound(_) | StoreError::OrderNotFound(_) | StoreError::LineNotFound(_) => {
            "notFound"
        }
        StoreError::CartLocked => "cartLocked",
        StoreError::VersionConflict { .. } => "versionConflict",
        StoreError::InvalidTransition { .. } => "invalidTransition",
        StoreError::InvalidQuantity { .. } => "validation",
        StoreError::Unavailable(_) => "internal",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        (self.status(), Json(self.body())).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use devsnippets_core::OwnerId;

    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_store_error_status_codes() {
        assert_eq!(
            status_of(AppError::Store(StoreError::CartNotFound(OwnerId::new("x")))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::Store(StoreError::CartLocked)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::Store(StoreError::VersionConflict {
                expected: 1,
                found: 2
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::Store(StoreError::Unavailable("down".to_owned()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_checkout_error_status_codes() {
        assert_eq!(
            status_of(AppError::Checkout(CheckoutError::Declined {
                reason: "insufficient funds".to_owned()
            })),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(AppError::Checkout(CheckoutError::GatewayUnavailable {
                retry_after: None
            })),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::Checkout(CheckoutError::ClaimFailed(
                StoreError::VersionConflict {
                    expected: 1,
                    found: 2
                }
            ))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::Unauthorized("no identity".to_owned())),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_gateway_unavailable_body_has_retry_after() {
        let err = AppError::Checkout(CheckoutError::GatewayUnavailable {
            retry_after: Some(Duration::from_secs(30)),
        });
        let body = err.body();
        assert_eq!(body.reason, "gatewayUnavailable");
        assert_eq!(body.retry_after, Some(30));
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let err = AppError::Internal("connection pool exploded".to_owned());
        let body = err.body();
        assert_eq!(body.reason, "internal");
        assert!(!body.message.contains("exploded"));
    }

    #[test]
    fn test_declined_body_reason() {
        let err = AppError::Checkout(CheckoutError::Declined {
            reason: "insufficient funds".to_owned(),
        });
        let body = err.body();
        assert_eq!(body.reason, "declined");
        assert!(body.message.contains("insufficient funds"));
    }
}
