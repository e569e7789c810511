//! Diagnostic endpoints
//!
//! Engine failures come back as `200 {"success": false, "error": ...}` so a
//! caller can tell a provider problem apart from a bad request.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tunebridge_common::{Provider, ServiceConnection, Track};

use super::{parse_provider, UserId};
use crate::db::connections;
use crate::error::{ApiError, ApiResult, ProviderError};
use crate::services::track_matcher;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub artist: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub playlist_id: String,
}

fn failure(error: impl std::fmt::Display) -> Json<Value> {
    Json(json!({ "success": false, "error": error.to_string() }))
}

async fn connection_for(state: &AppState, user_id: &str, provider: Provider) -> ApiResult<ServiceConnection> {
    connections::get_connection(&state.db, user_id, provider)
        .await?
        .ok_or_else(|| ProviderError::NotConnected(provider).into())
}

/// GET /debug/search?service&track&artist
pub async fn debug_search(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    if query.service.is_empty() || query.track.is_empty() {
        return Err(ApiError::BadRequest("Service and track name are required".to_string()));
    }
    let provider = parse_provider(&query.service)?;
    let mut connection = connection_for(&state, &user_id, provider).await?;

    if let Err(e) = state.credentials.ensure_fresh(&mut connection).await {
        return Ok(failure(e));
    }

    let target = state.registry.get(provider)?;
    let source = Track::new("", query.track, query.artist);

    match track_matcher::find_match(target.as_ref(), &connection.access_token, &source).await {
        Ok(result) if result.is_found() => Ok(Json(json!({
            "success": true,
            "track": result.track,
            "confidence": result.confidence,
        }))),
        Ok(_) => Ok(failure("no matching track found")),
        Err(e) => Ok(failure(e)),
    }
}

/// GET /debug/playlist?service&playlist_id
pub async fn debug_playlist(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<PlaylistQuery>,
) -> ApiResult<Json<Value>> {
    if query.service.is_empty() || query.playlist_id.is_empty() {
        return Err(ApiError::BadRequest("Service and playlist ID are required".to_string()));
    }
    let provider = parse_provider(&query.service)?;
    let mut connection = connection_for(&state, &user_id, provider).await?;

    if let Err(e) = state.credentials.ensure_fresh(&mut connection).await {
        return Ok(failure(e));
    }

    let source = state.registry.get(provider)?;
    match source.fetch_tracks(&connection.access_token, &query.playlist_id).await {
        Ok(playlist) => Ok(Json(json!({
            "success": true,
            "playlist_name": playlist.name,
            "tracks_count": playlist.tracks.len(),
            "tracks": playlist.tracks,
        }))),
        Err(e) => Ok(failure(e)),
    }
}

/// GET /debug/rate-limits
///
/// Limiter state and request counters per provider.
pub async fn debug_rate_limits(State(state): State<AppState>, UserId(_user_id): UserId) -> Json<Value> {
    let metrics = state.client.metrics().snapshot().await;
    let mut providers = serde_json::Map::new();

    for provider in Provider::ALL {
        let limiter = state.client.limiter().stats(provider).await;
        providers.insert(
            provider.to_string(),
            json!({
                "limiter": limiter,
                "metrics": metrics.get(&provider).cloned().unwrap_or_default(),
            }),
        );
    }

    Json(json!({ "success": true, "rate_limits": providers }))
}

pub fn debug_routes() -> Router<AppState> {
    Router::new()
        .route("/debug/search", get(debug_search))
        .route("/debug/playlist", get(debug_playlist))
        .route("/debug/rate-limits", get(debug_rate_limits))
}
