//! YouTube Data API v3
//!
//! Unstructured metadata: videos only have free-text titles, so playlist
//! items and search hits are decomposed by the matching engine.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tunebridge_common::{Provider, Track};

use super::{decode_json, endpoint, ensure_success, MusicProvider, ProviderProfile, SearchCandidate, SourcePlaylist, TitleMetadata};
use crate::error::ProviderError;
use crate::services::http_client::ResilientClient;
use crate::services::track_matcher::{parse_video_title, MAX_CANDIDATES};

const PROVIDER: Provider = Provider::Youtube;
const PLAYLIST_PAGE_SIZE: &str = "50";
/// YouTube's "Music" video category
const MUSIC_CATEGORY_ID: &str = "10";
const FALLBACK_PLAYLIST_NAME: &str = "YouTube Playlist";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    #[serde(default)]
    video_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: ItemSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistsResponse {
    #[serde(default)]
    items: Vec<PlaylistResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    #[serde(default)]
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: ItemSnippet,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct CreatedPlaylist {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: String,
    name: Option<String>,
}

/// Free-text query biased toward official audio uploads
pub fn search_query(track: &Track) -> String {
    format!("{} {} official audio", track.title, track.artist)
}

pub struct YoutubeProvider {
    client: Arc<ResilientClient>,
    api_base_url: String,
    profile_url: String,
}

impl YoutubeProvider {
    pub fn new(client: Arc<ResilientClient>, api_base_url: String, profile_url: String) -> Self {
        Self {
            client,
            api_base_url,
            profile_url,
        }
    }

    async fn playlist_name(&self, access_token: &str, playlist_id: &str) -> Result<String, ProviderError> {
        let request = self
            .client
            .http()
            .get(endpoint(&self.api_base_url, "playlists"))
            .query(&[("part", "snippet"), ("id", playlist_id)])
            .bearer_auth(access_token);
        let response = self.client.execute(PROVIDER, request).await?;
        let playlists: PlaylistsResponse = decode_json(PROVIDER, response).await?;

        playlists
            .items
            .into_iter()
            .next()
            .map(|p| p.snippet.title)
            .ok_or_else(|| ProviderError::decode(PROVIDER, "playlist not found"))
    }
}

#[async_trait]
impl MusicProvider for YoutubeProvider {
    fn provider(&self) -> Provider {
        PROVIDER
    }

    fn title_metadata(&self) -> TitleMetadata {
        TitleMetadata::Unstructured
    }

    async fn fetch_tracks(&self, access_token: &str, playlist_id: &str) -> Result<SourcePlaylist, ProviderError> {
        let request = self
            .client
            .http()
            .get(endpoint(&self.api_base_url, "playlistItems"))
            .query(&[
                ("part", "snippet,contentDetails"),
                ("playlistId", playlist_id),
                ("maxResults", PLAYLIST_PAGE_SIZE),
            ])
            .bearer_auth(access_token);
        let response = self.client.execute(PROVIDER, request).await?;
        let page: PlaylistItemsResponse = decode_json(PROVIDER, response).await?;

        let name = match self.playlist_name(access_token, playlist_id).await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(provider = %PROVIDER, "Could not fetch playlist name: {}", e);
                FALLBACK_PLAYLIST_NAME.to_string()
            }
        };

        let tracks: Vec<Track> = page
            .items
            .into_iter()
            .filter(|item| !item.snippet.resource_id.video_id.is_empty())
            .map(|item| {
                let (artist, title) = parse_video_title(&item.snippet.title);
                tracing::debug!(
                    original = %item.snippet.title,
                    artist = %artist,
                    track = %title,
                    "Decomposed video title"
                );
                Track::new(item.snippet.resource_id.video_id, title, artist)
            })
            .collect();

        tracing::info!(provider = %PROVIDER, playlist = %name, tracks = tracks.len(), "Fetched playlist");

        Ok(SourcePlaylist { name, tracks })
    }

    async fn search(&self, access_token: &str, track: &Track) -> Result<Vec<SearchCandidate>, ProviderError> {
        let query = search_query(track);
        let max_results = MAX_CANDIDATES.to_string();
        tracing::debug!(provider = %PROVIDER, query = %query, "Searching");

        let request = self
            .client
            .http()
            .get(endpoint(&self.api_base_url, "search"))
            .query(&[
                ("part", "snippet"),
                ("q", query.as_str()),
                ("type", "video"),
                ("maxResults", max_results.as_str()),
                ("videoCategoryId", MUSIC_CATEGORY_ID),
            ])
            .bearer_auth(access_token);
        let response = self.client.execute(PROVIDER, request).await?;
        let results: SearchResponse = decode_json(PROVIDER, response).await?;

        Ok(results
            .items
            .into_iter()
            .filter(|item| !item.id.video_id.is_empty())
            .map(|item| SearchCandidate {
                id: item.id.video_id,
                title: item.snippet.title,
                artist: String::new(),
                description: item.snippet.description,
            })
            .collect())
    }

    async fn create_playlist(&self, access_token: &str, name: &str, description: &str) -> Result<String, ProviderError> {
        let request = self
            .client
            .http()
            .post(endpoint(&self.api_base_url, "playlists"))
            .query(&[("part", "snippet,status")])
            .bearer_auth(access_token)
            .json(&json!({
                "snippet": { "title": name, "description": description },
                "status": { "privacyStatus": "private" },
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
            .post(endpoint(&self.api_base_url, "playlistItems"))
            .query(&[("part", "snippet")])
            .bearer_auth(access_token)
            .json(&json!({
                "snippet": {
                    "playlistId": playlist_id,
                    "resourceId": { "kind": "youtube#video", "videoId": track_id },
                }
            }));
        let response = self.client.execute(PROVIDER, request).await?;
        ensure_success(PROVIDER, response).await?;
        Ok(())
    }

    async fn whoami(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let request = self.client.http().get(&self.profile_url).bearer_auth(access_token);
        let response = self.client.execute(PROVIDER, request).await?;
        let info: UserInfo = decode_json(PROVIDER, response).await?;

        Ok(ProviderProfile {
            display_name: info.name.unwrap_or_else(|| info.id.clone()),
            id: info.id,
        })
    }
}
