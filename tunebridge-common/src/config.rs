//! Configuration loading for tunebridge services
//!
//! Resolution order (highest priority first):
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (`apply_env_overrides`)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! A missing TOML file is not an error: the service logs a warning and starts
//! with defaults.

use crate::{Error, Provider, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "TUNEBRIDGE_CONFIG";

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingConfig,
    pub transfers: TransferSettings,
    pub retry: RetrySettings,
    pub providers: ProvidersConfig,
}

/// HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the HTTP server binds to
    pub bind: String,
    /// Public URL of this service, used to derive OAuth redirect URIs
    pub backend_url: String,
    /// Dashboard URL users are sent back to after connecting a service
    pub frontend_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            backend_url: "http://localhost:8080".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Background job housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Jobs still pending/processing after this long without an update are marked failed
    pub stale_after_minutes: i64,
    /// How often the staleness sweep runs
    pub sweep_interval_seconds: u64,
    /// How often request metrics are written to the log
    pub metrics_log_interval_seconds: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            stale_after_minutes: 60,
            sweep_interval_seconds: 300,
            metrics_log_interval_seconds: 300,
        }
    }
}

/// Outbound request retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt (3 → 4 attempts total)
    pub max_retries: u32,
    /// Linear backoff unit for network and server errors: `(attempt + 1) * unit`
    pub backoff_unit_ms: u64,
    /// Backoff unit for throttled responses without `Retry-After`: `(attempt + 1) * unit`
    pub rate_limit_backoff_unit_ms: u64,
    /// Client-side timeout for every HTTP call
    pub request_timeout_seconds: u64,
    /// Upper bound on waiting for a rate limiter token
    pub admission_timeout_seconds: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit_ms: 1000,
            rate_limit_backoff_unit_ms: 5000,
            request_timeout_seconds: 30,
            admission_timeout_seconds: 30,
        }
    }
}

impl RetrySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_secs(self.admission_timeout_seconds)
    }
}

/// Per-provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub spotify: ProviderSettings,
    pub youtube: ProviderSettings,
}

impl ProvidersConfig {
    pub fn get(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::Spotify => &self.spotify,
            Provider::Youtube => &self.youtube,
        }
    }

    pub fn get_mut(&mut self, provider: Provider) -> &mut ProviderSettings {
        match provider {
            Provider::Spotify => &mut self.spotify,
            Provider::Youtube => &mut self.youtube,
        }
    }
}

/// OAuth client, endpoints and rate limits for one provider
///
/// Blank endpoint fields are filled with the provider's public endpoints by
/// [`TransferConfig::finalize`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
    /// "Who am I" endpoint used for validation and connection profiles
    pub profile_url: String,
    pub api_base_url: String,
    pub scopes: Vec<String>,
    pub requests_per_second: Option<f64>,
    pub burst: Option<u32>,
}

impl ProviderSettings {
    /// Public endpoints and quotas for a provider
    pub fn defaults_for(provider: Provider) -> Self {
        match provider {
            Provider::Spotify => Self {
                auth_url: "https://accounts.spotify.com/authorize".to_string(),
                token_url: "https://accounts.spotify.com/api/token".to_string(),
                revoke_url: "https://accounts.spotify.com/api/token".to_string(),
                profile_url: "https://api.spotify.com/v1/me".to_string(),
                api_base_url: "https://api.spotify.com/v1".to_string(),
                scopes: vec![
                    "playlist-read-private".to_string(),
                    "playlist-read-collaborative".to_string(),
                    "playlist-modify-public".to_string(),
                    "playlist-modify-private".to_string(),
                ],
                requests_per_second: Some(10.0),
                burst: Some(20),
                ..Default::default()
            },
            Provider::Youtube => Self {
                auth_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
                profile_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
                api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
                scopes: vec![
                    "https://www.googleapis.com/auth/youtube".to_string(),
                    "https://www.googleapis.com/auth/youtube.readonly".to_string(),
                    "https://www.googleapis.com/auth/userinfo.profile".to_string(),
                ],
                requests_per_second: Some(1.0),
                burst: Some(5),
                ..Default::default()
            },
        }
    }

    /// Fill every blank field from `defaults`
    fn fill_blanks(&mut self, defaults: ProviderSettings) {
        fn fill(field: &mut String, default: String) {
            if field.trim().is_empty() {
                *field = default;
            }
        }

        fill(&mut self.auth_url, defaults.auth_url);
        fill(&mut self.token_url, defaults.token_url);
        fill(&mut self.revoke_url, defaults.revoke_url);
        fill(&mut self.profile_url, defaults.profile_url);
        fill(&mut self.api_base_url, defaults.api_base_url);
        if self.scopes.is_empty() {
            self.scopes = defaults.scopes;
        }
        if self.requests_per_second.is_none() {
            self.requests_per_second = defaults.requests_per_second;
        }
        if self.burst.is_none() {
            self.burst = defaults.burst;
        }
    }
}

impl TransferConfig {
    /// Load configuration from an explicit path, `TUNEBRIDGE_CONFIG`, or the
    /// platform config directory, then apply environment overrides.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            Some(path) => {
                warn!(
                    "Config file not found at {}, using built-in defaults",
                    path.display()
                );
                Self::default()
            }
            None => {
                warn!("No config file location available, using built-in defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.finalize();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without applying overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_value("TUNEBRIDGE_BIND") {
            self.server.bind = bind;
        }
        if let Some(path) = env_value("TUNEBRIDGE_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = env_value("TUNEBRIDGE_BACKEND_URL") {
            self.server.backend_url = url;
        }
        if let Some(url) = env_value("TUNEBRIDGE_FRONTEND_URL") {
            self.server.frontend_url = url;
        }

        for provider in Provider::ALL {
            let prefix = provider.as_str().to_ascii_uppercase();
            let settings = self.providers.get_mut(provider);
            if let Some(id) = env_value(&format!("{}_CLIENT_ID", prefix)) {
                settings.client_id = id;
            }
            if let Some(secret) = env_value(&format!("{}_CLIENT_SECRET", prefix)) {
                settings.client_secret = secret;
            }
        }
    }

    /// Fill provider endpoints and derive redirect URIs from the backend URL
    pub fn finalize(&mut self) {
        let backend = self.server.backend_url.trim_end_matches('/').to_string();
        for provider in Provider::ALL {
            let settings = self.providers.get_mut(provider);
            settings.fill_blanks(ProviderSettings::defaults_for(provider));
            if settings.redirect_uri.trim().is_empty() {
                settings.redirect_uri = format!("{}/services/callback/{}", backend, provider);
            }
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        for provider in Provider::ALL {
            let settings = self.providers.get(provider);
            match (settings.requests_per_second, settings.burst) {
                (Some(rate), _) if !(rate > 0.0) => {
                    return Err(Error::Config(format!(
                        "{}: requests_per_second must be positive",
                        provider
                    )));
                }
                (_, Some(0)) => {
                    return Err(Error::Config(format!("{}: burst must be at least 1", provider)));
                }
                _ => {}
            }
            if settings.client_id.is_empty() {
                warn!(provider = %provider, "OAuth client id not configured; connecting this service will fail");
            }
        }

        if self.transfers.stale_after_minutes <= 0 {
            return Err(Error::Config("stale_after_minutes must be positive".to_string()));
        }
        if self.transfers.sweep_interval_seconds == 0 || self.transfers.metrics_log_interval_seconds == 0 {
            return Err(Error::Config("background task intervals must be at least 1 second".to_string()));
        }

        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// `~/.config/tunebridge/config.toml` (platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tunebridge").join("config.toml"))
}

/// `~/.local/share/tunebridge/tunebridge.db` (platform equivalent)
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tunebridge"))
        .unwrap_or_else(|| PathBuf::from("./tunebridge_data"))
        .join("tunebridge.db")
}
