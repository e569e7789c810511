//! Database models
//!
//! Rows persisted by the transfer service plus the transient `Track` that
//! providers hand to the matching engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// A third-party music service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Spotify,
    Youtube,
}

impl Provider {
    /// Every provider the service knows how to talk to
    pub const ALL: [Provider; 2] = [Provider::Spotify, Provider::Youtube];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Spotify => "spotify",
            Provider::Youtube => "youtube",
        }
    }

    /// Human-facing name used in messages and playlist descriptions
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Spotify => "Spotify",
            Provider::Youtube => "YouTube Music",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spotify" => Ok(Provider::Spotify),
            "youtube" => Ok(Provider::Youtube),
            other => Err(Error::InvalidInput(format!("Unsupported service provider: {}", other))),
        }
    }
}

/// A user's OAuth link to one provider
///
/// One row per (user, provider). Tokens are never serialized into API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConnection {
    pub user_id: String,
    pub provider: Provider,
    #[serde(skip_serializing, default)]
    pub access_token: String,
    #[serde(skip_serializing, default)]
    pub refresh_token: String,
    pub token_expiry: DateTime<Utc>,
    pub provider_user_id: String,
    pub provider_user_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceConnection {
    pub fn new(
        user_id: impl Into<String>,
        provider: Provider,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_expiry: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            provider,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_expiry,
            provider_user_id: String::new(),
            provider_user_name: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Seconds until the access token expires (negative when already expired)
    pub fn expires_in_seconds(&self) -> i64 {
        (self.token_expiry - Utc::now()).num_seconds()
    }
}

/// A track as reported by a provider
///
/// Transient: produced by playlist fetches and searches, never stored on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Provider-specific track (or video) identifier
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }

    /// Sentinel returned when a search finds nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

/// Transfer job lifecycle
///
/// pending → processing → {completed | completed_with_errors | failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Persisted, background task not yet running
    Pending,
    /// Background task is working through the playlist
    Processing,
    /// Every track was matched and added
    Completed,
    /// Some tracks matched, some did not
    CompletedWithErrors,
    /// Stage failure, zero matches, or an unhandled fault
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Completed => "completed",
            TransferStatus::CompletedWithErrors => "completed_with_errors",
            TransferStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::CompletedWithErrors | TransferStatus::Failed
        )
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        match self {
            TransferStatus::Pending => {
                matches!(next, TransferStatus::Processing | TransferStatus::Failed)
            }
            TransferStatus::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "processing" => Ok(TransferStatus::Processing),
            "completed" => Ok(TransferStatus::Completed),
            "completed_with_errors" => Ok(TransferStatus::CompletedWithErrors),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(Error::Internal(format!("Unknown transfer status: {}", other))),
        }
    }
}

/// One playlist transfer job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub user_id: String,
    pub source_provider: Provider,
    pub source_playlist_id: String,
    pub source_playlist_name: String,
    pub target_provider: Provider,
    pub target_playlist_id: String,
    /// Caller-supplied override until the destination playlist exists, then its real name
    pub target_playlist_name: String,
    pub status: TransferStatus,
    pub tracks_total: u32,
    pub tracks_matched: u32,
    pub tracks_failed: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Create a new job in the `pending` state
    pub fn new(
        user_id: impl Into<String>,
        source_provider: Provider,
        source_playlist_id: impl Into<String>,
        target_provider: Provider,
        target_playlist_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            source_provider,
            source_playlist_id: source_playlist_id.into(),
            source_playlist_name: String::new(),
            target_provider,
            target_playlist_id: String::new(),
            target_playlist_name: target_playlist_name.unwrap_or_default(),
            status: TransferStatus::Pending,
            tracks_total: 0,
            tracks_matched: 0,
            tracks_failed: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Final status once every track has been attempted
    pub fn outcome(matched: u32, failed: u32) -> TransferStatus {
        if matched == 0 {
            TransferStatus::Failed
        } else if failed == 0 {
            TransferStatus::Completed
        } else {
            TransferStatus::CompletedWithErrors
        }
    }
}

/// Per-track result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Found on the target and appended to the destination playlist
    Matched,
    /// Search failed or returned nothing
    NotFound,
    /// Found, but the append call failed
    Error,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Matched => "matched",
            TrackStatus::NotFound => "not_found",
            TrackStatus::Error => "error",
        }
    }
}

impl FromStr for TrackStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matched" => Ok(TrackStatus::Matched),
            "not_found" => Ok(TrackStatus::NotFound),
            "error" => Ok(TrackStatus::Error),
            other => Err(Error::Internal(format!("Unknown track status: {}", other))),
        }
    }
}

/// Outcome row for one source track of a transfer (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTrack {
    pub transfer_id: Uuid,
    pub source_track_id: String,
    pub source_track_name: String,
    pub source_artist: String,
    pub target_track_id: Option<String>,
    pub target_track_name: Option<String>,
    pub target_artist: Option<String>,
    pub status: TrackStatus,
    pub match_confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl TransferTrack {
    pub fn not_found(transfer_id: Uuid, source: &Track) -> Self {
        Self {
            transfer_id,
            source_track_id: source.id.clone(),
            source_track_name: source.title.clone(),
            source_artist: source.artist.clone(),
            target_track_id: None,
            target_track_name: None,
            target_artist: None,
            status: TrackStatus::NotFound,
            match_confidence: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Row for a track that was found on the target; `status` says whether the append worked
    pub fn found(
        transfer_id: Uuid,
        source: &Track,
        target: &Track,
        confidence: f64,
        status: TrackStatus,
    ) -> Self {
        Self {
            target_track_id: Some(target.id.clone()),
            target_track_name: Some(target.title.clone()),
            target_artist: Some(target.artist.clone()),
            status,
            match_confidence: confidence.clamp(0.0, 1.0),
            ..Self::not_found(transfer_id, source)
        }
    }

    pub fn is_matched(&self) -> bool {
        self.status == TrackStatus::Matched
    }
}
