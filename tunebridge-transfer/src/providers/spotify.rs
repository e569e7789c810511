//! Spotify Web API
//!
//! Structured metadata: search results carry separate title and artist fields.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tunebridge_common::{Provider, Track};

use super::{decode_json, endpoint, ensure_success, MusicProvider, ProviderProfile, SearchCandidate, SourcePlaylist, TitleMetadata};
use crate::error::ProviderError;
use crate::services::http_client::ResilientClient;

const PROVIDER: Provider = Provider::Spotify;
const SEARCH_LIMIT: &str = "5";

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifyExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    #[serde(default)]
    album: SpotifyAlbum,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    external_ids: SpotifyExternalIds,
}

impl SpotifyTrack {
    fn first_artist(&self) -> String {
        self.artists.first().map(|a| a.name.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    /// Null for removed or local tracks
    track: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTracks {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    name: String,
    tracks: PlaylistTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct CreatedPlaylist {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: String,
    display_name: Option<String>,
}

/// Field-filtered search query; the artist filter is dropped when unknown
pub fn search_query(track: &Track) -> String {
    if track.artist.trim().is_empty() {
        format!("track:{}", track.title)
    } else {
        format!("track:{} artist:{}", track.title, track.artist)
    }
}

pub fn track_uri(track_id: &str) -> String {
    format!("spotify:track:{}", track_id)
}

pub struct SpotifyProvider {
    client: Arc<ResilientClient>,
    api_base_url: String,
    profile_url: String,
}

impl SpotifyProvider {
    pub fn new(client: Arc<ResilientClient>, api_base_url: String, profile_url: String) -> Self {
        Self {
            client,
            api_base_url,
            profile_url,
        }
    }
}

#[async_trait]
impl MusicProvider for SpotifyProvider {
    fn provider(&self) -> Provider {
        PROVIDER
    }

    fn title_metadata(&self) -> TitleMetadata {
        TitleMetadata::Structured
    }

    async fn fetch_tracks(&self, access_token: &str, playlist_id: &str) -> Result<SourcePlaylist, ProviderError> {
        let url = endpoint(&self.api_base_url, &format!("playlists/{}", playlist_id));
        let request = self.client.http().get(url).bearer_auth(access_token);
        let response = self.client.execute(PROVIDER, request).await?;
        let playlist: PlaylistResponse = decode_json(PROVIDER, response).await?;

        let tracks: Vec<Track> = playlist
            .tracks
            .items
            .into_iter()
            .filter_map(|item| item.track)
            .filter_map(|t| {
                let artist = t.first_artist();
                let id = t.id?;
                Some(Track {
                    id,
                    title: t.name,
                    artist,
                    album: t.album.name,
                    duration_ms: t.duration_ms,
                    isrc: t.external_ids.isrc,
                })
            })
            .collect();

        tracing::info!(
            provider = %PROVIDER,
            playlist = %playlist.name,
            tracks = tracks.len(),
            "Fetched playlist"
        );

        Ok(SourcePlaylist {
            name: playlist.name,
            tracks,
        })
    }

    async fn search(&self, access_token: &str, track: &Track) -> Result<Vec<SearchCandidate>, ProviderError> {
        let query = search_query(track);
        tracing::debug!(provider = %PROVIDER, query = %query, "Searching");

        let request = self
            .client
            .http()
            .get(endpoint(&self.api_base_url, "search"))
            .query(&[("q", query.as_str()), ("type", "track"), ("limit", SEARCH_LIMIT)])
            .bearer_auth(access_token);
        let response = self.client.execute(PROVIDER, request).await?;
        let results: SearchResponse = decode_json(PROVIDER, response).await?;

        Ok(results
            .tracks
            .items
            .into_iter()
            .filter_map(|t| {
                let artist = t.first_artist();
                Some(SearchCandidate {
                    id: t.id?,
                    title: t.name,
                    artist,
                    description: String::new(),
                })
            })
            .collect())
    }

    async fn create_playlist(&self, access_token: &str, name: &str, description: &str) -> Result<String, ProviderError> {
        let me = self.whoami(access_token).await?;

        let request = self
            .client
            .http()
            .post(endpoint(&self.api_base_url, &format!("users/{}/playlists", me.id)))
            .bearer_auth(access_token)
            .json(&json!({
                "name": name,
                "description": description,
                "public": false,
            }));
        let response = self.client.execute(PROVIDER, request).await?;
        let created: CreatedPlaylist = decode_json(PROVIDER, response).await?;

        tracing::info!(provider = %PROVIDER, playlist_id = %created.id, "Created playlist");
        Ok(created.id)
    }

    async fn append_track(&self, access_token: &str, playlist_id: &str, track_id: &str) -> Result<(), ProviderError> {
        let request = self
            .client
            .http()
            .post(endpoint(&self.api_base_url, &format!("playlists/{}/tracks", playlist_id)))
            .bearer_auth(access_token)
            .json(&json!({ "uris": [track_uri(track_id)] }));
        let response = self.client.execute(PROVIDER, request).await?;
        ensure_success(PROVIDER, response).await?;
        Ok(())
    }

    async fn whoami(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let request = self.client.http().get(&self.profile_url).bearer_auth(access_token);
        let response = self.client.execute(PROVIDER, request).await?;
        let me: MeResponse = decode_json(PROVIDER, response).await?;

        Ok(ProviderProfile {
            display_name: me.display_name.unwrap_or_else(|| me.id.clone()),
            id: me.id,
        })
    }
}
