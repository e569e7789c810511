//! Resilient client behaviour over real HTTP: Retry-After and pacing

mod helpers;

use helpers::{spawn_mock_provider, MockProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tunebridge_common::Provider;
use tunebridge_transfer::services::http_client::{ResilientClient, RetryPolicy};
use tunebridge_transfer::services::rate_limiter::RateLimiter;
use tunebridge_transfer::ProviderError;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        backoff_unit: Duration::from_millis(10),
        rate_limit_backoff_unit: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_retry_after_is_honored() {
    let (base, mock) = spawn_mock_provider().await;
    let client = ResilientClient::new(Arc::new(RateLimiter::default()), fast_policy()).unwrap();

    let started = Instant::now();
    let response = client
        .execute(Provider::Spotify, client.http().get(format!("{}/throttled", base)))
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(MockProvider::hits(&mock.throttled_hits), 3);
    // Two waits of Retry-After: 2, not the 10ms fallback backoff
    assert!(started.elapsed() >= Duration::from_secs(4));

    let metrics = client.metrics().snapshot().await;
    assert_eq!(metrics[&Provider::Spotify].total_requests, 3);
    assert_eq!(metrics[&Provider::Spotify].rate_limited, 2);
}

#[tokio::test]
async fn test_throttling_beyond_retries_is_rate_limited_error() {
    let (base, mock) = spawn_mock_provider().await;
    let policy = RetryPolicy {
        max_retries: 1,
        ..fast_policy()
    };
    let client = ResilientClient::new(Arc::new(RateLimiter::default()), policy).unwrap();

    let err = client
        .execute(Provider::Youtube, client.http().get(format!("{}/throttled", base)))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::RateLimited(Provider::Youtube)));
    assert_eq!(MockProvider::hits(&mock.throttled_hits), 2);
}

#[tokio::test]
async fn test_limiter_paces_outbound_requests() {
    let (base, _mock) = spawn_mock_provider().await;
    let limiter = Arc::new(RateLimiter::default());
    limiter.configure(Provider::Youtube, 10.0, 1).await;
    let client = ResilientClient::new(limiter, fast_policy()).unwrap();

    let started = Instant::now();
    for _ in 0..4 {
        let response = client
            .execute(Provider::Youtube, client.http().get(format!("{}/youtube/userinfo", base)))
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    // One token up front, then one every 100ms
    assert!(started.elapsed() >= Duration::from_millis(280));
}

#[tokio::test]
async fn test_admission_timeout_surfaces_without_network() {
    let (base, mock) = spawn_mock_provider().await;
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(50)));
    limiter.configure(Provider::Spotify, 0.1, 1).await;
    assert!(limiter.try_admit(Provider::Spotify).await);

    let client = ResilientClient::new(limiter, fast_policy()).unwrap();
    let err = client
        .execute(Provider::Spotify, client.http().get(format!("{}/throttled", base)))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::RateLimitTimeout(Provider::Spotify)));
    assert_eq!(MockProvider::hits(&mock.throttled_hits), 0);
}
