//! Configuration loading and graceful degradation
//!
//! Tests that manipulate process environment are marked #[serial] so they
//! never race each other.

use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::Path;
use tunebridge_common::config::{ProviderSettings, TransferConfig};
use tunebridge_common::Provider;

const ENV_VARS: [&str; 9] = [
    "TUNEBRIDGE_CONFIG",
    "TUNEBRIDGE_BIND",
    "TUNEBRIDGE_DATABASE",
    "TUNEBRIDGE_BACKEND_URL",
    "TUNEBRIDGE_FRONTEND_URL",
    "SPOTIFY_CLIENT_ID",
    "SPOTIFY_CLIENT_SECRET",
    "YOUTUBE_CLIENT_ID",
    "YOUTUBE_CLIENT_SECRET",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_defaults() {
    let config = TransferConfig::default();

    assert_eq!(config.server.bind, "127.0.0.1:8080");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.backoff_unit_ms, 1000);
    assert_eq!(config.retry.rate_limit_backoff_unit_ms, 5000);
    assert_eq!(config.retry.request_timeout_seconds, 30);
    assert_eq!(config.retry.admission_timeout_seconds, 30);
    assert_eq!(config.transfers.stale_after_minutes, 60);
    assert!(config.database.path.ends_with("tunebridge.db"));
}

#[test]
fn test_provider_defaults_carry_asymmetric_quotas() {
    let spotify = ProviderSettings::defaults_for(Provider::Spotify);
    assert_eq!(spotify.requests_per_second, Some(10.0));
    assert_eq!(spotify.burst, Some(20));
    assert_eq!(spotify.profile_url, "https://api.spotify.com/v1/me");

    let youtube = ProviderSettings::defaults_for(Provider::Youtube);
    assert_eq!(youtube.requests_per_second, Some(1.0));
    assert_eq!(youtube.burst, Some(5));
    assert_eq!(youtube.revoke_url, "https://oauth2.googleapis.com/revoke");
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = TransferConfig::from_toml_str(
        r#"
        [server]
        bind = "0.0.0.0:9000"

        [retry]
        max_retries = 5

        [providers.youtube]
        client_id = "yt-client"
        burst = 2
        "#,
    )
    .unwrap();

    assert_eq!(config.server.bind, "0.0.0.0:9000");
    assert_eq!(config.server.frontend_url, "http://localhost:3000");
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.backoff_unit_ms, 1000);
    assert_eq!(config.providers.youtube.client_id, "yt-client");
    assert_eq!(config.providers.youtube.burst, Some(2));
    // Endpoints stay blank until finalize
    assert!(config.providers.youtube.token_url.is_empty());
}

#[test]
fn test_finalize_fills_endpoints_and_redirects() {
    let mut config = TransferConfig::from_toml_str(
        r#"
        [server]
        backend_url = "https://tunebridge.example/"

        [providers.spotify]
        token_url = "http://127.0.0.1:4000/token"
        "#,
    )
    .unwrap();
    config.finalize();

    let spotify = config.providers.get(Provider::Spotify);
    assert_eq!(spotify.token_url, "http://127.0.0.1:4000/token");
    assert_eq!(spotify.auth_url, "https://accounts.spotify.com/authorize");
    assert_eq!(spotify.requests_per_second, Some(10.0));
    assert_eq!(
        spotify.redirect_uri,
        "https://tunebridge.example/services/callback/spotify"
    );

    let youtube = config.providers.get(Provider::Youtube);
    assert_eq!(youtube.api_base_url, "https://www.googleapis.com/youtube/v3");
    assert!(!youtube.scopes.is_empty());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = TransferConfig::from_toml_str("[server\nbind = ").unwrap_err();
    assert!(err.to_string().contains("Parse TOML failed"));
}

#[test]
fn test_validate_rejects_zero_burst() {
    let mut config = TransferConfig::default();
    config.providers.spotify.burst = Some(0);
    config.finalize();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_non_positive_rate() {
    let mut config = TransferConfig::default();
    config.providers.youtube.requests_per_second = Some(0.0);
    config.finalize();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_sweep_interval() {
    let mut config = TransferConfig::default();
    config.transfers.sweep_interval_seconds = 0;
    config.finalize();
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = TransferConfig::load(Some(&missing)).unwrap();
    assert_eq!(config.server.bind, "127.0.0.1:8080");
    assert_eq!(config.providers.spotify.token_url, "https://accounts.spotify.com/api/token");
}

#[test]
#[serial]
fn test_load_reads_file_and_env_overrides_win() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [server]
        bind = "127.0.0.1:7000"

        [providers.spotify]
        client_id = "from-file"
        "#
    )
    .unwrap();

    env::set_var("TUNEBRIDGE_BIND", "127.0.0.1:7100");
    env::set_var("SPOTIFY_CLIENT_SECRET", "env-secret");
    env::set_var("TUNEBRIDGE_DATABASE", "/tmp/tunebridge-test.db");

    let config = TransferConfig::load(Some(file.path())).unwrap();
    clear_env();

    assert_eq!(config.server.bind, "127.0.0.1:7100");
    assert_eq!(config.providers.spotify.client_id, "from-file");
    assert_eq!(config.providers.spotify.client_secret, "env-secret");
    assert_eq!(config.database.path, Path::new("/tmp/tunebridge-test.db"));
}

#[test]
#[serial]
fn test_config_path_from_env() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

    env::set_var("TUNEBRIDGE_CONFIG", file.path());
    let config = TransferConfig::load(None).unwrap();
    clear_env();

    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_blank_env_values_are_ignored() {
    clear_env();
    env::set_var("TUNEBRIDGE_BIND", "   ");

    let mut config = TransferConfig::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.server.bind, "127.0.0.1:8080");
}

#[test]
#[serial]
fn test_backend_url_env_derives_redirect_uri() {
    clear_env();
    env::set_var("TUNEBRIDGE_BACKEND_URL", "https://api.example.org");

    let mut config = TransferConfig::default();
    config.apply_env_overrides();
    config.finalize();
    clear_env();

    assert_eq!(
        config.providers.youtube.redirect_uri,
        "https://api.example.org/services/callback/youtube"
    );
}
