//! Shared test helpers: mock provider server and app wiring
//!
//! The mock speaks just enough of the Spotify, YouTube and OAuth token
//! endpoints for end-to-end runs, and counts every hit.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{Form, Path, Query, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;
use tunebridge_common::config::TransferConfig;
use tunebridge_common::{Provider, ServiceConnection, Transfer};
use tunebridge_transfer::db::{connections, init_memory_pool, transfers};
use tunebridge_transfer::AppState;
use uuid::Uuid;

pub const USER: &str = "user-1";

/// Title the mock YouTube search never finds
pub const UNFINDABLE: &str = "Unfindable Song";

/// Hit counters and failure switches for the mock provider
#[derive(Default)]
pub struct MockProvider {
    pub token_hits: AtomicUsize,
    pub revoke_hits: AtomicUsize,
    pub search_hits: AtomicUsize,
    pub append_hits: AtomicUsize,
    pub playlists_created: AtomicUsize,
    pub throttled_hits: AtomicUsize,
    /// Token endpoint answers 400 invalid_grant
    pub reject_tokens: AtomicBool,
    /// Refresh grants issue a new refresh token and refuse a spent one
    pub rotate_refresh: AtomicBool,
    /// Refreshed tokens expire within the refresh window
    pub short_lived_refresh: AtomicBool,
    /// Refresh grants beyond this many answer 503 (0 = unlimited)
    pub refresh_grant_limit: AtomicUsize,
    pub refresh_grants: AtomicUsize,
    spent_refresh_tokens: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn hits(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

type Mock = State<Arc<MockProvider>>;

async fn token(State(mock): Mock, Form(form): Form<HashMap<String, String>>) -> Response {
    mock.token_hits.fetch_add(1, Ordering::SeqCst);
    if mock.reject_tokens.load(Ordering::SeqCst) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))).into_response();
    }

    match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") => refresh_grant(&mock, form.get("refresh_token").cloned().unwrap_or_default()),
        Some("authorization_code") if form.get("code").map(String::as_str) == Some("good-code") => Json(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_in": 3600,
        }))
        .into_response(),
        _ => (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_request" }))).into_response(),
    }
}

fn refresh_grant(mock: &MockProvider, presented: String) -> Response {
    let limit = mock.refresh_grant_limit.load(Ordering::SeqCst);
    if limit > 0 && mock.refresh_grants.load(Ordering::SeqCst) >= limit {
        return (StatusCode::SERVICE_UNAVAILABLE, "token service down").into_response();
    }

    let expires_in = if mock.short_lived_refresh.load(Ordering::SeqCst) { 60 } else { 3600 };

    if !mock.rotate_refresh.load(Ordering::SeqCst) {
        mock.refresh_grants.fetch_add(1, Ordering::SeqCst);
        return Json(json!({ "access_token": "refreshed-access", "expires_in": expires_in })).into_response();
    }

    let mut spent = mock.spent_refresh_tokens.lock().unwrap();
    if spent.contains(&presented) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))).into_response();
    }
    spent.push(presented);
    let grant = mock.refresh_grants.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": "refreshed-access",
        "refresh_token": format!("rotated-refresh-{}", grant),
        "expires_in": expires_in,
    }))
    .into_response()
}

async fn revoke(State(mock): Mock) -> StatusCode {
    mock.revoke_hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn spotify_me() -> Json<Value> {
    Json(json!({ "id": "spotify-user", "display_name": "Spotify Tester" }))
}

async fn spotify_playlist(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "missing" => (StatusCode::NOT_FOUND, Json(json!({ "error": { "status": 404 } }))).into_response(),
        "empty" => Json(json!({ "name": "Nothing Here", "tracks": { "items": [] } })).into_response(),
        _ => Json(json!({
            "name": "Road Trip",
            "tracks": { "items": [
                { "track": { "id": "sp1", "name": "One More Time", "artists": [{ "name": "Daft Punk" }], "album": { "name": "Discovery" }, "duration_ms": 320000 } },
                { "track": { "id": "sp2", "name": UNFINDABLE, "artists": [{ "name": "Nobody Known" }] } },
                { "track": { "id": "sp3", "name": "Get Lucky", "artists": [{ "name": "Daft Punk" }] } }
            ]}
        }))
        .into_response(),
    }
}

/// Echoes the `track:<title> artist:<artist>` query back as a single result
async fn spotify_search(State(mock): Mock, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let hit = mock.search_hits.fetch_add(1, Ordering::SeqCst);
    let query = params.get("q").cloned().unwrap_or_default();
    if query.contains(UNFINDABLE) {
        return Json(json!({ "tracks": { "items": [] } }));
    }

    let query = query.trim_start_matches("track:");
    let (title, artist) = query.split_once(" artist:").unwrap_or((query, ""));
    Json(json!({ "tracks": { "items": [
        { "id": format!("spt-{}", hit), "name": title, "artists": [{ "name": artist }] }
    ]}}))
}

async fn spotify_create_playlist(State(mock): Mock) -> Json<Value> {
    mock.playlists_created.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": "sp-playlist" }))
}

async fn spotify_append(State(mock): Mock) -> Json<Value> {
    mock.append_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "snapshot_id": "snap" }))
}

async fn youtube_userinfo() -> Json<Value> {
    Json(json!({ "id": "google-user", "name": "YouTube Tester" }))
}

async fn youtube_search(State(mock): Mock, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let hit = mock.search_hits.fetch_add(1, Ordering::SeqCst);
    let query = params.get("q").cloned().unwrap_or_default();
    if query.contains(UNFINDABLE) {
        return Json(json!({ "items": [] }));
    }

    let title = query.trim_end_matches(" official audio");
    Json(json!({ "items": [
        { "id": { "videoId": format!("vid-{}", hit) }, "snippet": { "title": format!("{} (Official Audio)", title), "description": "music" } }
    ]}))
}

async fn youtube_create_playlist(State(mock): Mock) -> Json<Value> {
    mock.playlists_created.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": "yt-playlist" }))
}

async fn youtube_append(State(mock): Mock) -> Json<Value> {
    mock.append_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": "item" }))
}

/// 429 with `Retry-After: 2` twice, then 200
async fn throttled(State(mock): Mock) -> Response {
    let hit = mock.throttled_hits.fetch_add(1, Ordering::SeqCst);
    if hit < 2 {
        (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "2")], "slow down").into_response()
    } else {
        Json(json!({ "ok": true })).into_response()
    }
}

/// Start the mock on an ephemeral port; returns its base URL
pub async fn spawn_mock_provider() -> (String, Arc<MockProvider>) {
    let mock = Arc::new(MockProvider::default());
    let app = Router::new()
        .route("/token", post(token))
        .route("/revoke", post(revoke))
        .route("/spotify/me", get(spotify_me))
        .route("/spotify/playlists/:id", get(spotify_playlist))
        .route("/spotify/search", get(spotify_search))
        .route("/spotify/users/:id/playlists", post(spotify_create_playlist))
        .route("/spotify/playlists/:id/tracks", post(spotify_append))
        .route("/youtube/userinfo", get(youtube_userinfo))
        .route("/youtube/search", get(youtube_search))
        .route("/youtube/playlists", post(youtube_create_playlist))
        .route("/youtube/playlistItems", post(youtube_append))
        .route("/throttled", get(throttled))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), mock)
}

/// Configuration pointing every provider endpoint at the mock
pub fn mock_config(base: &str) -> TransferConfig {
    let mut config = TransferConfig::default();
    config.server.frontend_url = "http://frontend.test".to_string();
    config.retry.backoff_unit_ms = 10;
    config.retry.rate_limit_backoff_unit_ms = 10;

    for provider in Provider::ALL {
        let settings = config.providers.get_mut(provider);
        settings.client_id = format!("{}-client", provider);
        settings.client_secret = "secret".to_string();
        settings.token_url = format!("{}/token", base);
        settings.revoke_url = format!("{}/revoke", base);
        settings.requests_per_second = Some(1000.0);
        settings.burst = Some(100);
    }
    config.providers.spotify.api_base_url = format!("{}/spotify", base);
    config.providers.spotify.profile_url = format!("{}/spotify/me", base);
    config.providers.youtube.api_base_url = format!("{}/youtube", base);
    config.providers.youtube.profile_url = format!("{}/youtube/userinfo", base);

    config.finalize();
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: SqlitePool,
    pub mock: Arc<MockProvider>,
}

impl TestApp {
    pub async fn new() -> Self {
        let (base, mock) = spawn_mock_provider().await;
        let pool = init_memory_pool().await.unwrap();
        let state = AppState::new(pool.clone(), mock_config(&base)).unwrap();
        let router = tunebridge_transfer::build_router(state.clone());
        Self {
            router,
            state,
            pool,
            mock,
        }
    }

    /// Store a connection for `USER` expiring `expires_in` from now
    pub async fn connect(&self, provider: Provider, expires_in: Duration) -> ServiceConnection {
        let conn = ServiceConnection::new(USER, provider, "stored-access", "stored-refresh", Utc::now() + expires_in);
        connections::upsert_connection(&self.pool, &conn).await.unwrap();
        conn
    }

    pub async fn connect_both(&self) {
        self.connect(Provider::Spotify, Duration::hours(1)).await;
        self.connect(Provider::Youtube, Duration::hours(1)).await;
    }

    /// Send a request as `USER`; returns status and JSON body (Null when empty)
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri).header("X-User-Id", USER);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Poll until the job reaches a terminal status
    pub async fn wait_for_terminal(&self, id: Uuid) -> Transfer {
        for _ in 0..250 {
            let transfer = transfers::get_transfer(&self.pool, id).await.unwrap().unwrap();
            if transfer.status.is_terminal() {
                return transfer;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("transfer {} did not finish", id);
    }
}
