//! Service connection persistence
//!
//! One row per (user, provider). Created or replaced when an OAuth handshake
//! completes, token columns rewritten on refresh, deleted on disconnect.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tunebridge_common::{Provider, Result, ServiceConnection};

use super::{parse_timestamp, timestamp};

fn row_to_connection(row: &SqliteRow) -> Result<ServiceConnection> {
    let provider: String = row.get("provider");
    let token_expiry: String = row.get("token_expiry");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(ServiceConnection {
        user_id: row.get("user_id"),
        provider: provider.parse::<Provider>()?,
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        token_expiry: parse_timestamp(&token_expiry)?,
        provider_user_id: row.get("provider_user_id"),
        provider_user_name: row.get("provider_user_name"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Insert or replace the user's connection for `connection.provider`
///
/// `created_at` survives a reconnect.
pub async fn upsert_connection(pool: &SqlitePool, connection: &ServiceConnection) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO service_connections (
            user_id, provider, access_token, refresh_token, token_expiry,
            provider_user_id, provider_user_name, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, provider) DO UPDATE SET
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            token_expiry = excluded.token_expiry,
            provider_user_id = excluded.provider_user_id,
            provider_user_name = excluded.provider_user_name,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&connection.user_id)
    .bind(connection.provider.as_str())
    .bind(&connection.access_token)
    .bind(&connection.refresh_token)
    .bind(timestamp(connection.token_expiry))
    .bind(&connection.provider_user_id)
    .bind(&connection.provider_user_name)
    .bind(timestamp(connection.created_at))
    .bind(timestamp(connection.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_connection(
    pool: &SqlitePool,
    user_id: &str,
    provider: Provider,
) -> Result<Option<ServiceConnection>> {
    let row = sqlx::query("SELECT * FROM service_connections WHERE user_id = ? AND provider = ?")
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_connection).transpose()
}

pub async fn list_connections(pool: &SqlitePool, user_id: &str) -> Result<Vec<ServiceConnection>> {
    let rows = sqlx::query("SELECT * FROM service_connections WHERE user_id = ? ORDER BY provider")
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_connection).collect()
}

/// Persist refreshed tokens
pub async fn update_tokens(pool: &SqlitePool, connection: &ServiceConnection) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE service_connections
        SET access_token = ?, refresh_token = ?, token_expiry = ?, updated_at = ?
        WHERE user_id = ? AND provider = ?
        "#,
    )
    .bind(&connection.access_token)
    .bind(&connection.refresh_token)
    .bind(timestamp(connection.token_expiry))
    .bind(timestamp(connection.updated_at))
    .bind(&connection.user_id)
    .bind(connection.provider.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Returns false when there was nothing to delete
pub async fn delete_connection(pool: &SqlitePool, user_id: &str, provider: Provider) -> Result<bool> {
    let result = sqlx::query("DELETE FROM service_connections WHERE user_id = ? AND provider = ?")
        .bind(user_id)
        .bind(provider.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_upsert_get_and_reconnect() {
        let pool = init_memory_pool().await.unwrap();
        let mut conn = ServiceConnection::new(
            "user-1",
            Provider::Spotify,
            "access-1",
            "refresh-1",
            Utc::now() + Duration::hours(1),
        );
        conn.provider_user_id = "sp-42".to_string();
        conn.provider_user_name = "Listener".to_string();
        upsert_connection(&pool, &conn).await.unwrap();

        let stored = get_connection(&pool, "user-1", Provider::Spotify)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, "access-1");
        assert_eq!(stored.provider_user_name, "Listener");

        conn.access_token = "access-2".to_string();
        upsert_connection(&pool, &conn).await.unwrap();

        let all = list_connections(&pool, "user-1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].access_token, "access-2");

        assert!(get_connection(&pool, "user-1", Provider::Youtube)
            .await
            .unwrap()
            .is_none());
        assert!(get_connection(&pool, "user-2", Provider::Spotify)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_tokens_and_delete() {
        let pool = init_memory_pool().await.unwrap();
        let mut conn = ServiceConnection::new("u", Provider::Youtube, "a", "r", Utc::now());
        upsert_connection(&pool, &conn).await.unwrap();

        conn.access_token = "fresh".to_string();
        conn.token_expiry = Utc::now() + Duration::hours(1);
        update_tokens(&pool, &conn).await.unwrap();

        let stored = get_connection(&pool, "u", Provider::Youtube).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh");
        assert!(stored.expires_in_seconds() > 3500);

        assert!(delete_connection(&pool, "u", Provider::Youtube).await.unwrap());
        assert!(!delete_connection(&pool, "u", Provider::Youtube).await.unwrap());
    }
}
