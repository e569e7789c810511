//! Transfer job and per-track result persistence
//!
//! Status changes are guarded in SQL: a row only moves forward through
//! pending → processing → terminal, whoever writes it. Track rows and the
//! parent counters are written in one transaction.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tunebridge_common::{Error, Provider, Result, TrackStatus, Transfer, TransferStatus, TransferTrack};
use uuid::Uuid;

use super::{parse_timestamp, retry_on_lock, timestamp, MAX_LOCK_WAIT_MS};

fn row_to_transfer(row: &SqliteRow) -> Result<Transfer> {
    let id: String = row.get("id");
    let source_provider: String = row.get("source_provider");
    let target_provider: String = row.get("target_provider");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Transfer {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("Invalid transfer id: {}", e)))?,
        user_id: row.get("user_id"),
        source_provider: source_provider.parse::<Provider>()?,
        source_playlist_id: row.get("source_playlist_id"),
        source_playlist_name: row.get("source_playlist_name"),
        target_provider: target_provider.parse::<Provider>()?,
        target_playlist_id: row.get("target_playlist_id"),
        target_playlist_name: row.get("target_playlist_name"),
        status: status.parse::<TransferStatus>()?,
        tracks_total: row.get::<i64, _>("tracks_total") as u32,
        tracks_matched: row.get::<i64, _>("tracks_matched") as u32,
        tracks_failed: row.get::<i64, _>("tracks_failed") as u32,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_track(row: &SqliteRow) -> Result<TransferTrack> {
    let transfer_id: String = row.get("transfer_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(TransferTrack {
        transfer_id: Uuid::parse_str(&transfer_id)
            .map_err(|e| Error::Internal(format!("Invalid transfer id: {}", e)))?,
        source_track_id: row.get("source_track_id"),
        source_track_name: row.get("source_track_name"),
        source_artist: row.get("source_artist"),
        target_track_id: row.get("target_track_id"),
        target_track_name: row.get("target_track_name"),
        target_artist: row.get("target_artist"),
        status: status.parse::<TrackStatus>()?,
        match_confidence: row.get("match_confidence"),
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Persist a new job record
pub async fn insert_transfer(pool: &SqlitePool, transfer: &Transfer) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transfers (
            id, user_id, source_provider, source_playlist_id, source_playlist_name,
            target_provider, target_playlist_id, target_playlist_name, status,
            tracks_total, tracks_matched, tracks_failed, error_message, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(transfer.id.to_string())
    .bind(&transfer.user_id)
    .bind(transfer.source_provider.as_str())
    .bind(&transfer.source_playlist_id)
    .bind(&transfer.source_playlist_name)
    .bind(transfer.target_provider.as_str())
    .bind(&transfer.target_playlist_id)
    .bind(&transfer.target_playlist_name)
    .bind(transfer.status.as_str())
    .bind(transfer.tracks_total as i64)
    .bind(transfer.tracks_matched as i64)
    .bind(transfer.tracks_failed as i64)
    .bind(&transfer.error_message)
    .bind(timestamp(transfer.created_at))
    .bind(timestamp(transfer.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_transfer(pool: &SqlitePool, id: Uuid) -> Result<Option<Transfer>> {
    let row = sqlx::query("SELECT * FROM transfers WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_transfer).transpose()
}

/// Fetch a job only if it belongs to `user_id`
pub async fn get_user_transfer(pool: &SqlitePool, user_id: &str, id: Uuid) -> Result<Option<Transfer>> {
    let row = sqlx::query("SELECT * FROM transfers WHERE id = ? AND user_id = ?")
        .bind(id.to_string())
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_transfer).transpose()
}

/// Newest first
pub async fn list_transfers(pool: &SqlitePool, user_id: &str, limit: u32) -> Result<Vec<Transfer>> {
    let rows = sqlx::query(
        "SELECT * FROM transfers WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_transfer).collect()
}

/// Track rows in processing order
pub async fn list_tracks(pool: &SqlitePool, transfer_id: Uuid) -> Result<Vec<TransferTrack>> {
    let rows = sqlx::query("SELECT * FROM transfer_tracks WHERE transfer_id = ? ORDER BY id")
        .bind(transfer_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_track).collect()
}

/// pending → processing; false if the job already left `pending`
pub async fn mark_processing(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE transfers SET status = 'processing', updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(timestamp(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_source_playlist_name(pool: &SqlitePool, id: Uuid, name: &str) -> Result<()> {
    sqlx::query("UPDATE transfers SET source_playlist_name = ?, updated_at = ? WHERE id = ?")
        .bind(name)
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Record the created destination playlist and fix `tracks_total`
///
/// Only applies while the job is processing and before any track was recorded.
pub async fn set_target_playlist(
    pool: &SqlitePool,
    id: Uuid,
    playlist_id: &str,
    playlist_name: &str,
    tracks_total: u32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE transfers
        SET target_playlist_id = ?, target_playlist_name = ?, tracks_total = ?, updated_at = ?
        WHERE id = ? AND status = 'processing' AND tracks_matched = 0 AND tracks_failed = 0
        "#,
    )
    .bind(playlist_id)
    .bind(playlist_name)
    .bind(tracks_total as i64)
    .bind(timestamp(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Append one track result and bump the matching counter atomically
///
/// Returns false (and writes nothing) when the job is no longer processing
/// or every track has already been accounted for.
pub async fn record_track(pool: &SqlitePool, track: &TransferTrack) -> Result<bool> {
    let (matched, failed): (i64, i64) = if track.is_matched() { (1, 0) } else { (0, 1) };
    let transfer_id = track.transfer_id.to_string();
    let transfer_id = transfer_id.as_str();
    let created_at = timestamp(track.created_at);
    let created_at = created_at.as_str();

    retry_on_lock("record_track", MAX_LOCK_WAIT_MS, move || async move {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE transfers
            SET tracks_matched = tracks_matched + ?, tracks_failed = tracks_failed + ?, updated_at = ?
            WHERE id = ? AND status = 'processing' AND tracks_matched + tracks_failed < tracks_total
            "#,
        )
        .bind(matched)
        .bind(failed)
        .bind(timestamp(Utc::now()))
        .bind(transfer_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO transfer_tracks (
                transfer_id, source_track_id, source_track_name, source_artist,
                target_track_id, target_track_name, target_artist, status,
                match_confidence, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transfer_id)
        .bind(&track.source_track_id)
        .bind(&track.source_track_name)
        .bind(&track.source_artist)
        .bind(&track.target_track_id)
        .bind(&track.target_track_name)
        .bind(&track.target_artist)
        .bind(track.status.as_str())
        .bind(track.match_confidence)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok::<bool, Error>(true)
    })
    .await
}

/// Move a non-terminal job to a terminal status
///
/// Returns false when the job was already terminal; terminal rows never change.
pub async fn finish(
    pool: &SqlitePool,
    id: Uuid,
    status: TransferStatus,
    error_message: Option<&str>,
) -> Result<bool> {
    if !status.is_terminal() {
        return Err(Error::Internal(format!("{} is not a terminal status", status)));
    }

    let result = sqlx::query(
        r#"
        UPDATE transfers SET status = ?, error_message = ?, updated_at = ?
        WHERE id = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(timestamp(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fail every pending/processing job not updated since `cutoff`
pub async fn fail_stale(pool: &SqlitePool, cutoff: DateTime<Utc>, message: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE transfers SET status = 'failed', error_message = ?, updated_at = ?
        WHERE status IN ('pending', 'processing') AND updated_at < ?
        "#,
    )
    .bind(message)
    .bind(timestamp(Utc::now()))
    .bind(timestamp(cutoff))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
