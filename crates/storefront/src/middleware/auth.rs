//! Authenticated identity extraction.
//!
//! Authentication protocol details live outside this service: by the time a
//! request reaches these handlers, the `Authorization: Bearer` value IS the
//! opaque owner identity (an upstream verifier - API gateway, session layer -
//! has already exchanged credentials for it). Handlers only care that an
//! identity is present and which resources it may touch.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use devsnippets_core::OwnerId;

use crate::error::AppError;

/// The authenticated buyer on this request.
///
/// Rejects with 401 when the bearer value is missing or empty.
#[derive(Debug, Clone)]
pub struct AuthenticatedOwner(pub OwnerId);

impl AuthenticatedOwner {
    /// Check that the authenticated identity owns the addressed resource.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Forbidden` on mismatch.
    pub fn authorize(&self, owner_id: &OwnerId) -> Result<(), AppError> {
        if &self.0 == owner_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "resource belongs to another buyer".to_owned(),
            ))
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedOwner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing authorization header".to_owned()))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized("authorization header must be a bearer token".to_owned())
            })?;

        Ok(Self(OwnerId::new(token)))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<AuthenticatedOwner, AppError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header("authorization", value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        AuthenticatedOwner::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_bearer_token_becomes_owner() {
        let owner = extract(Some("Bearer buyer-42")).await.unwrap();
        assert_eq!(owner.0, OwnerId::new("buyer-42"));
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        assert!(matches!(
            extract(None).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_non_bearer_header_is_unauthorized() {
        assert!(matches!(
            extract(Some("Basic dXNlcjpwYXNz")).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            extract(Some("Bearer   ")).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_authorize_checks_ownership() {
        let owner = AuthenticatedOwner(OwnerId::new("buyer-1"));
        assert!(owner.authorize(&OwnerId::new("buyer-1")).is_ok());
        assert!(matches!(
            owner.authorize(&OwnerId::new("buyer-2")),
            Err(AppError::Forbidden(_))
        ));
    }
}
