//! Error types for tunebridge-transfer
//!
//! `ProviderError` is the engine taxonomy for everything that can go wrong
//! talking to a third-party service. `ApiError` is what HTTP handlers return;
//! it always renders as `{"error": "<message>"}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tunebridge_common::Provider;

/// Failures talking to a third-party music service
///
/// Messages never include raw provider response bodies.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Waited longer than the admission bound for a rate limiter token
    #[error("Timed out waiting for {0} rate limit capacity")]
    RateLimitTimeout(Provider),

    /// Provider kept throttling after every retry was spent
    #[error("{0} rate limited the request after exhausting retries")]
    RateLimited(Provider),

    /// Connection, DNS or timeout failure after every retry was spent
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// 5xx still returned on the final attempt
    #[error("{provider} server error (status {status})")]
    ServerError { provider: Provider, status: u16 },

    /// 4xx other than 429; never retried
    #[error("{provider} rejected the request (status {status})")]
    ProviderRejected { provider: Provider, status: u16 },

    /// The stored credential can no longer be refreshed; the user must reconnect
    #[error("{0} credentials expired, please reconnect the service")]
    RefreshFailed(Provider),

    /// User has no connection for this provider
    #[error("{} not connected", .0.display_name())]
    NotConnected(Provider),

    /// Response body did not have the expected shape
    #[error("Unexpected response from {provider}: {message}")]
    Decode { provider: Provider, message: String },

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Persisting refreshed credentials failed
    #[error(transparent)]
    Storage(#[from] tunebridge_common::Error),
}

impl ProviderError {
    /// Map a non-success status code from `provider` onto the taxonomy
    pub fn from_status(provider: Provider, status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => ProviderError::RateLimited(provider),
            code if code >= 500 => ProviderError::ServerError { provider, status: code },
            code => ProviderError::ProviderRejected { provider, status: code },
        }
    }

    pub fn decode(provider: Provider, err: impl std::fmt::Display) -> Self {
        ProviderError::Decode {
            provider,
            message: err.to_string(),
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing identity or unusable service connection (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Invalid request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),

    /// Third-party service failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// tunebridge-common error
    #[error(transparent)]
    Common(#[from] tunebridge_common::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Provider(ProviderError::RefreshFailed(_))
            | ApiError::Provider(ProviderError::NotConnected(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Provider(ProviderError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Common(tunebridge_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Common(tunebridge_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "Request failed: {}", self);
        }

        // Storage details stay in the log
        let message = match &self {
            ApiError::Common(tunebridge_common::Error::Database(_))
            | ApiError::Provider(ProviderError::Storage(_)) => "Internal database error".to_string(),
            ApiError::Common(tunebridge_common::Error::InvalidInput(msg))
            | ApiError::Common(tunebridge_common::Error::NotFound(msg)) => msg.clone(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
