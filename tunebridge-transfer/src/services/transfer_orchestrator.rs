//! Transfer job execution
//!
//! A job is persisted as `pending`, then driven by its own background task:
//! fetch source tracks, create the destination playlist, match and append
//! each track, finalize. Per-track failures are recorded and skipped; stage
//! failures (credentials, fetch, playlist creation) end the job as `failed`.
//! Anything that escapes the run, panics included, is caught at the task
//! boundary and also ends the job as `failed`.

use chrono::Utc;
use sqlx::SqlitePool;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tunebridge_common::{Provider, ServiceConnection, TrackStatus, Transfer, TransferStatus, TransferTrack};
use uuid::Uuid;

use super::credentials::CredentialManager;
use super::track_matcher;
use crate::db::{connections, transfers};
use crate::error::{ApiError, ProviderError};
use crate::providers::{MusicProvider, ProviderRegistry};

/// Error message written by the staleness sweep
pub const STALE_MESSAGE: &str = "transfer abandoned: no progress before restart or timeout";

/// Parameters for a new job
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub source_provider: Provider,
    pub source_playlist_id: String,
    pub target_provider: Provider,
    pub target_playlist_name: Option<String>,
}

#[derive(Clone)]
pub struct TransferOrchestrator {
    db: SqlitePool,
    registry: ProviderRegistry,
    credentials: Arc<CredentialManager>,
}

impl TransferOrchestrator {
    pub fn new(db: SqlitePool, registry: ProviderRegistry, credentials: Arc<CredentialManager>) -> Self {
        Self {
            db,
            registry,
            credentials,
        }
    }

    /// Validate, persist as `pending`, and launch the background task
    ///
    /// Returns as soon as the record exists; the job itself is never awaited.
    pub async fn start_transfer(&self, user_id: &str, request: NewTransfer) -> Result<Transfer, ApiError> {
        let playlist_id = request.source_playlist_id.trim();
        if playlist_id.is_empty() {
            return Err(ApiError::BadRequest("source_playlist_id is required".to_string()));
        }

        for provider in [request.source_provider, request.target_provider] {
            self.registry.get(provider)?;
            if connections::get_connection(&self.db, user_id, provider).await?.is_none() {
                return Err(ProviderError::NotConnected(provider).into());
            }
        }

        let target_name = request
            .target_playlist_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let transfer = Transfer::new(
            user_id,
            request.source_provider,
            playlist_id,
            request.target_provider,
            target_name,
        );
        transfers::insert_transfer(&self.db, &transfer).await?;

        tracing::info!(
            transfer_id = %transfer.id,
            user_id = %user_id,
            source = %transfer.source_provider,
            target = %transfer.target_provider,
            "Transfer created"
        );

        self.spawn(transfer.clone());
        Ok(transfer)
    }

    /// Run `transfer` on its own task, converting any escaped fault into `failed`
    pub fn spawn(&self, transfer: Transfer) -> JoinHandle<()> {
        let this = self.clone();

        tokio::spawn(async move {
            let transfer_id = transfer.id;
            let worker = {
                let this = this.clone();
                tokio::spawn(async move { this.run(transfer).await })
            };

            let fault = match worker.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(join_err) if join_err.is_panic() => {
                    Some(format!("Unexpected fault: {}", panic_message(join_err.into_panic())))
                }
                Err(join_err) => Some(format!("Transfer task cancelled: {}", join_err)),
            };

            if let Some(message) = fault {
                tracing::error!(transfer_id = %transfer_id, "Transfer aborted: {}", message);
                if let Err(e) =
                    transfers::finish(&this.db, transfer_id, TransferStatus::Failed, Some(&message)).await
                {
                    tracing::error!(transfer_id = %transfer_id, "Failed to record transfer failure: {}", e);
                }
            }
        })
    }

    async fn fail_stage(&self, transfer_id: Uuid, message: String) -> Result<(), ProviderError> {
        tracing::warn!(transfer_id = %transfer_id, "Transfer failed: {}", message);
        transfers::finish(&self.db, transfer_id, TransferStatus::Failed, Some(&message)).await?;
        Ok(())
    }

    async fn load_connection(&self, user_id: &str, provider: Provider) -> Result<ServiceConnection, ProviderError> {
        connections::get_connection(&self.db, user_id, provider)
            .await?
            .ok_or(ProviderError::NotConnected(provider))
    }

    /// Drive one job to a terminal state
    ///
    /// Stage failures are written here and return `Ok`; an `Err` means the
    /// run could not even record its own outcome.
    async fn run(&self, transfer: Transfer) -> Result<(), ProviderError> {
        let id = transfer.id;

        if !transfers::mark_processing(&self.db, id).await? {
            tracing::warn!(transfer_id = %id, "Transfer is no longer pending, skipping");
            return Ok(());
        }
        tracing::info!(transfer_id = %id, "=== Starting transfer ===");

        let source = self.registry.get(transfer.source_provider)?;
        let target = self.registry.get(transfer.target_provider)?;

        let mut source_conn = match self.load_connection(&transfer.user_id, transfer.source_provider).await {
            Ok(conn) => conn,
            Err(e) => return self.fail_stage(id, e.to_string()).await,
        };
        if let Err(e) = self.credentials.ensure_fresh(&mut source_conn).await {
            return self.fail_stage(id, e.to_string()).await;
        }

        // Same-provider jobs share one stored credential, refreshed once
        let mut target_conn = if transfer.target_provider == transfer.source_provider {
            source_conn.clone()
        } else {
            let mut conn = match self.load_connection(&transfer.user_id, transfer.target_provider).await {
                Ok(conn) => conn,
                Err(e) => return self.fail_stage(id, e.to_string()).await,
            };
            if let Err(e) = self.credentials.ensure_fresh(&mut conn).await {
                return self.fail_stage(id, e.to_string()).await;
            }
            conn
        };

        // Stage 1: source tracks
        let playlist = match source
            .fetch_tracks(&source_conn.access_token, &transfer.source_playlist_id)
            .await
        {
            Ok(playlist) => playlist,
            Err(e) => return self.fail_stage(id, format!("Failed to fetch source playlist: {}", e)).await,
        };
        transfers::set_source_playlist_name(&self.db, id, &playlist.name).await?;

        if playlist.tracks.is_empty() {
            return self.fail_stage(id, "source playlist is empty".to_string()).await;
        }

        // Stage 2: destination playlist
        let target_name = if transfer.target_playlist_name.is_empty() {
            playlist.name.clone()
        } else {
            transfer.target_playlist_name.clone()
        };
        let description = format!("Transferred from {}", transfer.source_provider.display_name());

        let target_playlist_id = match target
            .create_playlist(&target_conn.access_token, &target_name, &description)
            .await
        {
            Ok(playlist_id) => playlist_id,
            Err(e) => return self.fail_stage(id, format!("Failed to create target playlist: {}", e)).await,
        };

        let total = playlist.tracks.len() as u32;
        if !transfers::set_target_playlist(&self.db, id, &target_playlist_id, &target_name, total).await? {
            tracing::warn!(transfer_id = %id, "Transfer left processing before tracks were matched");
            return Ok(());
        }

        // Stage 3: match and append, one track at a time, in playlist order.
        // Once the target credential is lost the remaining tracks are
        // recorded as not found and the job still finalizes from its counts.
        let mut matched = 0u32;
        let mut failed = 0u32;
        let mut credential_error: Option<ProviderError> = None;

        for (idx, track) in playlist.tracks.iter().enumerate() {
            tracing::info!(
                transfer_id = %id,
                "Processing track {}/{}: {} - {}",
                idx + 1,
                total,
                track.artist,
                track.title
            );

            let row = if credential_error.is_some() {
                TransferTrack::not_found(id, track)
            } else {
                match self.credentials.ensure_fresh(&mut target_conn).await {
                    Ok(()) => {
                        self.process_track(target.as_ref(), &target_conn, &target_playlist_id, id, track)
                            .await
                    }
                    Err(e) => {
                        tracing::warn!(
                            transfer_id = %id,
                            "Target credentials unusable, skipping remaining tracks: {}",
                            e
                        );
                        credential_error = Some(e);
                        TransferTrack::not_found(id, track)
                    }
                }
            };

            if row.is_matched() {
                matched += 1;
            } else {
                failed += 1;
            }

            if !transfers::record_track(&self.db, &row).await? {
                tracing::warn!(transfer_id = %id, "Transfer is no longer processing, stopping");
                return Ok(());
            }
        }

        let status = Transfer::outcome(matched, failed);
        let message = match (&credential_error, status) {
            (Some(e), _) => Some(format!("Transfer stopped early: {}", e)),
            (None, TransferStatus::Failed) => Some(format!(
                "No tracks could be matched on {}",
                transfer.target_provider.display_name()
            )),
            (None, _) => None,
        };
        transfers::finish(&self.db, id, status, message.as_deref()).await?;

        tracing::info!(
            transfer_id = %id,
            matched,
            failed,
            total,
            status = %status,
            "=== Transfer finished ==="
        );
        Ok(())
    }

    async fn process_track(
        &self,
        target: &dyn MusicProvider,
        target_conn: &ServiceConnection,
        target_playlist_id: &str,
        transfer_id: Uuid,
        track: &tunebridge_common::Track,
    ) -> TransferTrack {
        let found = match track_matcher::find_match(target, &target_conn.access_token, track).await {
            Ok(result) if result.is_found() => result,
            Ok(_) => {
                tracing::info!(transfer_id = %transfer_id, "No match found for {} - {}", track.artist, track.title);
                return TransferTrack::not_found(transfer_id, track);
            }
            Err(e) => {
                tracing::warn!(transfer_id = %transfer_id, "Track search failed: {}", e);
                return TransferTrack::not_found(transfer_id, track);
            }
        };

        let status = match target
            .append_track(&target_conn.access_token, target_playlist_id, &found.track.id)
            .await
        {
            Ok(()) => TrackStatus::Matched,
            Err(e) => {
                tracing::warn!(transfer_id = %transfer_id, "Failed to add track to playlist: {}", e);
                TrackStatus::Error
            }
        };

        TransferTrack::found(transfer_id, track, &found.track, found.confidence, status)
    }

    /// Fail jobs that have not progressed within `stale_after`
    pub async fn sweep_stale_transfers(&self, stale_after: chrono::Duration) -> tunebridge_common::Result<u64> {
        sweep_stale_transfers(&self.db, stale_after).await
    }
}

/// Fail pending/processing jobs whose last update is older than `stale_after`
pub async fn sweep_stale_transfers(db: &SqlitePool, stale_after: chrono::Duration) -> tunebridge_common::Result<u64> {
    let cutoff = Utc::now() - stale_after;
    let swept = transfers::fail_stale(db, cutoff, STALE_MESSAGE).await?;
    if swept > 0 {
        tracing::warn!(swept, "Marked stale transfers as failed");
    }
    Ok(swept)
}

/// Periodic staleness sweep; runs until the task is dropped
pub async fn run_stale_sweeper(db: SqlitePool, interval: Duration, stale_after: chrono::Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep_stale_transfers(&db, stale_after).await {
            tracing::error!("Staleness sweep failed: {}", e);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
