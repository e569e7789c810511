//! OAuth credential lifecycle
//!
//! Keeps stored access tokens usable: refreshes them when they are within
//! five minutes of expiry, probes them with a "who am I" call for health
//! checks, and handles the code exchange and revocation ends of a connection.

use chrono::{Duration, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tunebridge_common::config::{ProviderSettings, ProvidersConfig};
use tunebridge_common::{Provider, ServiceConnection};

use super::http_client::ResilientClient;
use crate::db::connections;
use crate::error::ProviderError;
use crate::providers::{ProviderProfile, ProviderRegistry};

/// Tokens expiring sooner than this are refreshed before use
pub const REFRESH_WINDOW_MINUTES: i64 = 5;

/// Lifetime assumed when a token response omits `expires_in`
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Tokens returned by an authorization-code exchange
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_seconds: i64,
}

/// Outcome of a health probe
#[derive(Debug, Clone, Serialize)]
pub struct TokenValidation {
    pub valid: bool,
    pub error: Option<String>,
}

pub struct CredentialManager {
    db: SqlitePool,
    client: Arc<ResilientClient>,
    oauth: ProvidersConfig,
    registry: ProviderRegistry,
}

impl CredentialManager {
    pub fn new(
        db: SqlitePool,
        client: Arc<ResilientClient>,
        oauth: ProvidersConfig,
        registry: ProviderRegistry,
    ) -> Self {
        Self {
            db,
            client,
            oauth,
            registry,
        }
    }

    fn settings(&self, provider: Provider) -> &ProviderSettings {
        self.oauth.get(provider)
    }

    /// Whether the token must be refreshed before use
    pub fn needs_refresh(connection: &ServiceConnection) -> bool {
        connection.token_expiry <= Utc::now() + Duration::minutes(REFRESH_WINDOW_MINUTES)
    }

    /// Refresh the access token if it expires within the refresh window
    ///
    /// No network traffic when the token is still comfortably valid. On
    /// refresh, the updated connection is persisted before returning.
    pub async fn ensure_fresh(&self, connection: &mut ServiceConnection) -> Result<(), ProviderError> {
        if !Self::needs_refresh(connection) {
            return Ok(());
        }

        let provider = connection.provider;
        tracing::info!(
            provider = %provider,
            user_id = %connection.user_id,
            "Refreshing access token"
        );

        if connection.refresh_token.is_empty() {
            tracing::warn!(provider = %provider, "No refresh token stored");
            return Err(ProviderError::RefreshFailed(provider));
        }

        let settings = self.settings(provider);
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", connection.refresh_token.as_str()),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
        ];
        let request = self.client.http().post(&settings.token_url).form(&form);
        let response = self.client.execute(provider, request).await?;

        let status = response.status();
        if status.is_client_error() {
            tracing::warn!(
                provider = %provider,
                status = status.as_u16(),
                "Provider rejected refresh token"
            );
            return Err(ProviderError::RefreshFailed(provider));
        }
        if !status.is_success() {
            return Err(ProviderError::from_status(provider, status));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::decode(provider, e))?;

        connection.access_token = token.access_token;
        if let Some(refresh) = token.refresh_token.filter(|r| !r.is_empty()) {
            connection.refresh_token = refresh;
        }
        connection.token_expiry =
            Utc::now() + Duration::seconds(token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS));
        connection.updated_at = Utc::now();

        connections::update_tokens(&self.db, connection).await?;
        tracing::debug!(
            provider = %provider,
            expires_in = connection.expires_in_seconds(),
            "Access token refreshed"
        );
        Ok(())
    }

    /// Refresh regardless of the stored expiry
    ///
    /// On failure the connection keeps its previous expiry.
    pub async fn force_refresh(&self, connection: &mut ServiceConnection) -> Result<(), ProviderError> {
        let previous_expiry = connection.token_expiry;
        connection.token_expiry = Utc::now() - Duration::hours(1);

        let result = self.ensure_fresh(connection).await;
        if result.is_err() {
            connection.token_expiry = previous_expiry;
        }
        result
    }

    /// Refresh if needed, then make one authenticated identity call
    ///
    /// For health checks only; never used inside a transfer.
    pub async fn validate(&self, connection: &mut ServiceConnection) -> TokenValidation {
        if let Err(e) = self.ensure_fresh(connection).await {
            return TokenValidation {
                valid: false,
                error: Some(e.to_string()),
            };
        }

        match self.whoami(connection).await {
            Ok(_) => TokenValidation {
                valid: true,
                error: None,
            },
            Err(e) => TokenValidation {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }

    async fn whoami(&self, connection: &ServiceConnection) -> Result<ProviderProfile, ProviderError> {
        let provider = self.registry.get(connection.provider)?;
        provider.whoami(&connection.access_token).await
    }

    /// Provider consent page URL for starting a connection
    pub fn authorize_url(&self, provider: Provider, state: &str) -> Result<String, ProviderError> {
        let settings = self.settings(provider);
        let scope = settings.scopes.join(" ");

        let mut params = vec![
            ("client_id", settings.client_id.as_str()),
            ("redirect_uri", settings.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", state),
        ];
        match provider {
            Provider::Spotify => params.push(("show_dialog", "true")),
            Provider::Youtube => {
                params.push(("access_type", "offline"));
                params.push(("prompt", "consent"));
            }
        }

        Url::parse_with_params(&settings.auth_url, &params)
            .map(String::from)
            .map_err(|e| ProviderError::InvalidRequest(format!("Invalid authorize URL: {}", e)))
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, provider: Provider, code: &str) -> Result<TokenGrant, ProviderError> {
        let settings = self.settings(provider);
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", settings.redirect_uri.as_str()),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
        ];
        let request = self.client.http().post(&settings.token_url).form(&form);
        let response = self.client.execute(provider, request).await?;
        let response = crate::providers::ensure_success(provider, response).await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::decode(provider, e))?;

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            expires_in_seconds: token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS),
        })
    }

    /// Complete a connection: exchange the code, look up the account, persist
    pub async fn connect(
        &self,
        user_id: &str,
        provider: Provider,
        code: &str,
    ) -> Result<ServiceConnection, ProviderError> {
        let grant = self.exchange_code(provider, code).await?;

        let mut connection = ServiceConnection::new(
            user_id,
            provider,
            grant.access_token,
            grant.refresh_token,
            Utc::now() + Duration::seconds(grant.expires_in_seconds),
        );
        let profile = self.whoami(&connection).await?;
        connection.provider_user_id = profile.id;
        connection.provider_user_name = profile.display_name;

        connections::upsert_connection(&self.db, &connection).await?;
        tracing::info!(
            provider = %provider,
            user_id = %user_id,
            account = %connection.provider_user_name,
            "Service connected"
        );
        Ok(connection)
    }

    /// Revoke the stored access token with the provider
    pub async fn revoke(&self, connection: &ServiceConnection) -> Result<(), ProviderError> {
        let provider = connection.provider;
        let settings = self.settings(provider);

        let request = match provider {
            Provider::Spotify => self
                .client
                .http()
                .post(&settings.revoke_url)
                .basic_auth(&settings.client_id, Some(&settings.client_secret))
                .form(&[
                    ("token", connection.access_token.as_str()),
                    ("token_type_hint", "access_token"),
                ]),
            Provider::Youtube => self
                .client
                .http()
                .post(&settings.revoke_url)
                .query(&[("token", connection.access_token.as_str())]),
        };

        let response = self.client.execute(provider, request).await?;
        crate::providers::ensure_success(provider, response).await?;
        tracing::info!(provider = %provider, "Revoked access token");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::services::http_client::RetryPolicy;
    use crate::services::rate_limiter::RateLimiter;
    use tunebridge_common::config::TransferConfig;

    async fn manager() -> CredentialManager {
        let mut config = TransferConfig::default();
        config.providers.spotify.client_id = "client-123".to_string();
        // Nothing listens here; any network call would fail
        config.providers.spotify.token_url = "http://127.0.0.1:9/token".to_string();
        config.finalize();

        let client = Arc::new(ResilientClient::new(Arc::new(RateLimiter::default()), RetryPolicy::default()).unwrap());
        let registry = ProviderRegistry::from_config(&config.providers, client.clone());
        CredentialManager::new(init_memory_pool().await.unwrap(), client, config.providers, registry)
    }

    #[tokio::test]
    async fn test_ensure_fresh_skips_valid_token() {
        let manager = manager().await;
        let mut conn = ServiceConnection::new(
            "u",
            Provider::Spotify,
            "access",
            "refresh",
            Utc::now() + Duration::hours(1),
        );

        manager.ensure_fresh(&mut conn).await.unwrap();
        manager.ensure_fresh(&mut conn).await.unwrap();
        assert_eq!(conn.access_token, "access");
        assert!(manager.client.metrics().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_is_refresh_failure() {
        let manager = manager().await;
        let mut conn = ServiceConnection::new("u", Provider::Spotify, "access", "", Utc::now());

        let err = manager.ensure_fresh(&mut conn).await.unwrap_err();
        assert!(matches!(err, ProviderError::RefreshFailed(Provider::Spotify)));
    }

    #[test]
    fn test_needs_refresh_window() {
        let soon = ServiceConnection::new("u", Provider::Youtube, "a", "r", Utc::now() + Duration::minutes(4));
        let later = ServiceConnection::new("u", Provider::Youtube, "a", "r", Utc::now() + Duration::minutes(6));
        assert!(CredentialManager::needs_refresh(&soon));
        assert!(!CredentialManager::needs_refresh(&later));
    }

    #[tokio::test]
    async fn test_authorize_url() {
        let manager = manager().await;
        let url = manager.authorize_url(Provider::Spotify, "state-1").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://accounts.spotify.com/authorize?"));
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["state"], "state-1");
        assert_eq!(params["response_type"], "code");
        assert!(params["scope"].contains("playlist-modify-private"));
        assert_eq!(params["redirect_uri"], "http://localhost:8080/services/callback/spotify");

        let youtube = manager.authorize_url(Provider::Youtube, "s").unwrap();
        assert!(youtube.contains("access_type=offline"));
    }
}
