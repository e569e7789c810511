//! Service connection endpoints
//!
//! OAuth connect/callback, listing, disconnect and token health.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tunebridge_common::{Provider, ServiceConnection};
use uuid::Uuid;

use super::{parse_provider, UserId};
use crate::db::connections;
use crate::error::{ApiError, ApiResult};
use crate::services::credentials::TokenValidation;
use crate::AppState;

/// How long an issued OAuth `state` stays redeemable
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

/// An authorization started by `/services/connect` and not yet completed
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub user_id: String,
    pub provider: Provider,
    pub issued_at: DateTime<Utc>,
}

impl PendingAuthorization {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at > Duration::minutes(OAUTH_STATE_TTL_MINUTES)
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    /// Exchange the refresh token even when the access token is still valid
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct ServiceListResponse {
    pub services: Vec<ServiceConnection>,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealth {
    /// "healthy" or "unhealthy"
    pub status: String,
    pub error: Option<String>,
    pub expires_in_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub health: HashMap<Provider, ConnectionHealth>,
}

/// GET /services
pub async fn list_services(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Json<ServiceListResponse>> {
    let services = connections::list_connections(&state.db, &user_id).await?;
    Ok(Json(ServiceListResponse { services }))
}

/// GET /services/connect/:provider
///
/// Redirects to the provider consent page. The generated `state` is kept
/// server-side and maps the callback back to this user.
pub async fn connect_service(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(provider): Path<String>,
) -> ApiResult<Redirect> {
    let provider = parse_provider(&provider)?;
    let oauth_state = Uuid::new_v4().to_string();
    let authorize_url = state.credentials.authorize_url(provider, &oauth_state)?;

    let now = Utc::now();
    {
        let mut pending = state.oauth_states.write().await;
        pending.retain(|_, auth| !auth.is_expired(now));
        pending.insert(
            oauth_state,
            PendingAuthorization {
                user_id: user_id.clone(),
                provider,
                issued_at: now,
            },
        );
    }

    tracing::info!(provider = %provider, user_id = %user_id, "Redirecting to provider consent page");
    Ok(Redirect::temporary(&authorize_url))
}

/// GET /services/callback/:provider
pub async fn service_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Redirect> {
    let provider = parse_provider(&provider)?;

    if let Some(error) = query.error.filter(|e| !e.is_empty()) {
        let description = query.error_description.unwrap_or_default();
        tracing::warn!(provider = %provider, error = %error, "OAuth authorization failed: {}", description);
        return Err(ApiError::BadRequest(format!(
            "{} authorization was not granted",
            provider.display_name()
        )));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Authorization code not provided".to_string()))?;
    let oauth_state = query.state.unwrap_or_default();

    let pending = state
        .oauth_states
        .write()
        .await
        .remove(&oauth_state)
        .filter(|auth| auth.provider == provider && !auth.is_expired(Utc::now()))
        .ok_or_else(|| ApiError::BadRequest("Invalid or expired OAuth state".to_string()))?;

    state.credentials.connect(&pending.user_id, provider, &code).await?;

    let target = format!(
        "{}/dashboard?message={}_connected",
        state.config.server.frontend_url.trim_end_matches('/'),
        provider
    );
    Ok(Redirect::temporary(&target))
}

/// DELETE /services/:provider
///
/// Revocation is best-effort; the connection is deleted either way.
pub async fn disconnect_service(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(provider): Path<String>,
) -> ApiResult<Json<DisconnectResponse>> {
    let provider = parse_provider(&provider)?;

    let connection = connections::get_connection(&state.db, &user_id, provider)
        .await?
        .ok_or_else(|| ApiError::NotFound("Service connection not found".to_string()))?;

    if let Err(e) = state.credentials.revoke(&connection).await {
        tracing::warn!(provider = %provider, "Failed to revoke token: {}", e);
    }

    connections::delete_connection(&state.db, &user_id, provider).await?;
    tracing::info!(provider = %provider, user_id = %user_id, "Service disconnected");

    Ok(Json(DisconnectResponse {
        message: format!("Successfully disconnected {}", provider.display_name()),
    }))
}

/// GET /services/health[?refresh=true]
///
/// Connections are probed concurrently; each probe may refresh its token.
/// With `refresh=true` every refresh token is exercised, not just expiring ones.
pub async fn token_health(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<HealthQuery>,
) -> ApiResult<Json<HealthReport>> {
    let force_refresh = query.refresh;
    let probes = connections::list_connections(&state.db, &user_id)
        .await?
        .into_iter()
        .map(|mut connection| {
            let credentials = state.credentials.clone();
            async move {
                if force_refresh {
                    if let Err(e) = credentials.force_refresh(&mut connection).await {
                        let failed = TokenValidation {
                            valid: false,
                            error: Some(e.to_string()),
                        };
                        return (connection, failed);
                    }
                }
                let validation = credentials.validate(&mut connection).await;
                (connection, validation)
            }
        });

    let health = join_all(probes)
        .await
        .into_iter()
        .map(|(connection, validation)| {
            (
                connection.provider,
                ConnectionHealth {
                    status: if validation.valid { "healthy" } else { "unhealthy" }.to_string(),
                    error: validation.error,
                    expires_in_seconds: connection.expires_in_seconds(),
                },
            )
        })
        .collect();

    Ok(Json(HealthReport { health }))
}

pub fn service_routes() -> Router<AppState> {
    Router::new()
        .route("/services", get(list_services))
        .route("/services/health", get(token_health))
        .route("/services/connect/:provider", get(connect_service))
        .route("/services/callback/:provider", get(service_callback))
        .route("/services/:provider", delete(disconnect_service))
}
