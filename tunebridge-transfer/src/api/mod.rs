//! HTTP API handlers for tunebridge-transfer
//!
//! Identity is established upstream; handlers read the caller from the
//! `X-User-Id` header through the [`UserId`] extractor.

pub mod debug;
pub mod health;
pub mod services;
pub mod transfers;

pub use debug::debug_routes;
pub use health::health_routes;
pub use services::service_routes;
pub use transfers::transfer_routes;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tunebridge_common::Provider;

use crate::error::ApiError;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or_else(|| ApiError::Unauthorized("User not authenticated".to_string()))
    }
}

/// Parse a provider name from a path or query parameter
pub(crate) fn parse_provider(value: &str) -> Result<Provider, ApiError> {
    value
        .parse::<Provider>()
        .map_err(|_| ApiError::BadRequest("Unsupported service provider".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<UserId, ApiError> {
        let (mut parts, _) = request.into_parts();
        UserId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_user_id_from_header() {
        let request = Request::builder().header("X-User-Id", " user-42 ").body(()).unwrap();
        assert_eq!(extract(request).await.unwrap(), UserId("user-42".to_string()));
    }

    #[tokio::test]
    async fn test_missing_or_blank_user_id_is_unauthorized() {
        let missing = Request::builder().body(()).unwrap();
        assert!(matches!(extract(missing).await, Err(ApiError::Unauthorized(_))));

        let blank = Request::builder().header("X-User-Id", "  ").body(()).unwrap();
        assert!(matches!(extract(blank).await, Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!(parse_provider("spotify").unwrap(), Provider::Spotify);
        assert!(matches!(parse_provider("tidal"), Err(ApiError::BadRequest(_))));
    }
}
