//! Database access for tunebridge-transfer
//!
//! SQLite through sqlx. Timestamps are stored as fixed-width RFC 3339 text
//! (millisecond precision, `Z` suffix) so they sort lexically.

pub mod connections;
pub mod transfers;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::{Duration, Instant};
use tunebridge_common::{Error, Result};

/// Upper bound on retrying a write that hit SQLITE_BUSY
pub const MAX_LOCK_WAIT_MS: u64 = 5000;

/// Initialize database connection pool
///
/// Creates the parent directory and database file when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with tables created
///
/// Every pooled connection to `sqlite::memory:` is a separate database, so
/// the pool is capped at one connection.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_connections (
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL DEFAULT '',
            token_expiry TEXT NOT NULL,
            provider_user_id TEXT NOT NULL DEFAULT '',
            provider_user_name TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, provider)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfers (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            source_provider TEXT NOT NULL,
            source_playlist_id TEXT NOT NULL,
            source_playlist_name TEXT NOT NULL DEFAULT '',
            target_provider TEXT NOT NULL,
            target_playlist_id TEXT NOT NULL DEFAULT '',
            target_playlist_name TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            tracks_total INTEGER NOT NULL DEFAULT 0,
            tracks_matched INTEGER NOT NULL DEFAULT 0,
            tracks_failed INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transfers_user_created ON transfers (user_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transfers_status ON transfers (status, updated_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfer_tracks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transfer_id TEXT NOT NULL REFERENCES transfers(id) ON DELETE CASCADE,
            source_track_id TEXT NOT NULL,
            source_track_name TEXT NOT NULL,
            source_artist TEXT NOT NULL,
            target_track_id TEXT,
            target_track_name TEXT,
            target_artist TEXT,
            status TEXT NOT NULL,
            match_confidence REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transfer_tracks_transfer ON transfer_tracks (transfer_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (service_connections, transfers, transfer_tracks)");

    Ok(())
}

/// Format a timestamp for storage
pub(crate) fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Retry a database operation while SQLite reports the database as locked
///
/// Exponential backoff from 10ms, capped at 1s per sleep, until `max_wait_ms`
/// has elapsed. Any other error is returned immediately.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = matches!(
                    &err,
                    Error::Database(db_err) if db_err.to_string().contains("database is locked")
                );
                if !is_lock_error {
                    return Err(err);
                }

                let elapsed = start.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed)",
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}
