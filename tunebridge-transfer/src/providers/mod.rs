//! Music provider integrations
//!
//! One [`MusicProvider`] implementation per service. All HTTP goes through
//! the shared [`ResilientClient`]; implementations only build requests and
//! decode responses.

pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tunebridge_common::config::ProvidersConfig;
use tunebridge_common::{Provider, Track};

use crate::error::ProviderError;
use crate::services::http_client::ResilientClient;

pub use spotify::SpotifyProvider;
pub use youtube::YoutubeProvider;

/// How a provider describes tracks in search results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleMetadata {
    /// Separate title and artist fields
    Structured,
    /// Free-text titles that need decomposition
    Unstructured,
}

/// Raw search hit before scoring
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchCandidate {
    pub id: String,
    pub title: String,
    /// Empty for unstructured providers
    pub artist: String,
    pub description: String,
}

/// Playlist name plus its tracks in playlist order
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourcePlaylist {
    pub name: String,
    pub tracks: Vec<Track>,
}

/// Account identity returned by the provider's "who am I" endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderProfile {
    pub id: String,
    pub display_name: String,
}

#[async_trait]
pub trait MusicProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn title_metadata(&self) -> TitleMetadata;

    /// Playlist name and a single bounded page of its tracks
    async fn fetch_tracks(&self, access_token: &str, playlist_id: &str) -> Result<SourcePlaylist, ProviderError>;

    /// Search candidates for `track`, best first as ranked by the provider
    async fn search(&self, access_token: &str, track: &Track) -> Result<Vec<SearchCandidate>, ProviderError>;

    /// Create a private playlist and return its id
    async fn create_playlist(&self, access_token: &str, name: &str, description: &str) -> Result<String, ProviderError>;

    async fn append_track(&self, access_token: &str, playlist_id: &str, track_id: &str) -> Result<(), ProviderError>;

    async fn whoami(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;
}

/// Provider implementations keyed by service
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn MusicProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider wired to its configured endpoints
    pub fn from_config(config: &ProvidersConfig, client: Arc<ResilientClient>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SpotifyProvider::new(
            client.clone(),
            config.spotify.api_base_url.clone(),
            config.spotify.profile_url.clone(),
        )));
        registry.register(Arc::new(YoutubeProvider::new(
            client,
            config.youtube.api_base_url.clone(),
            config.youtube.profile_url.clone(),
        )));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn MusicProvider>) {
        self.providers.insert(provider.provider(), provider);
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn MusicProvider>, ProviderError> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| ProviderError::InvalidRequest(format!("Unsupported service provider: {}", provider)))
    }
}

/// Pass 2xx responses through, map anything else onto the error taxonomy
///
/// The body of a failed response is logged at debug level and dropped.
pub(crate) async fn ensure_success(provider: Provider, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!(
        provider = %provider,
        status = status.as_u16(),
        body = %body.chars().take(500).collect::<String>(),
        "Provider returned error response"
    );
    Err(ProviderError::from_status(provider, status))
}

/// `ensure_success` then decode the JSON body
pub(crate) async fn decode_json<T: DeserializeOwned>(provider: Provider, response: Response) -> Result<T, ProviderError> {
    ensure_success(provider, response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ProviderError::decode(provider, e))
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
