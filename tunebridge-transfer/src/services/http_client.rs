//! Rate-limited, retrying HTTP client for provider APIs
//!
//! Every outbound provider call goes through [`ResilientClient::execute`]:
//!
//! | outcome                                   | action                                    |
//! |-------------------------------------------|-------------------------------------------|
//! | limiter admission fails                   | return `RateLimitTimeout`                 |
//! | network error                             | linear backoff, retry; last error surfaces|
//! | 429 or `X-RateLimit-Remaining: 0`         | `Retry-After` or `(n+1) * 5s`, retry; `RateLimited` when exhausted |
//! | 5xx                                       | linear backoff, retry; final response returned as-is |
//! | 2xx                                       | return                                    |
//! | other 4xx                                 | return, no retry                          |

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tunebridge_common::config::RetrySettings;
use tunebridge_common::Provider;

use super::rate_limiter::RateLimiter;
use crate::error::ProviderError;

const USER_AGENT: &str = concat!("tunebridge/", env!("CARGO_PKG_VERSION"));
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Retry and timeout knobs
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Linear backoff unit for network errors and 5xx
    pub backoff_unit: Duration,
    /// Backoff unit for throttled responses without `Retry-After`
    pub rate_limit_backoff_unit: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * (attempt + 1)
    }

    fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        self.rate_limit_backoff_unit * (attempt + 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff_unit: Duration::from_millis(settings.backoff_unit_ms),
            rate_limit_backoff_unit: Duration::from_millis(settings.rate_limit_backoff_unit_ms),
            request_timeout: settings.request_timeout(),
        }
    }
}

/// Counters for one provider
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderMetrics {
    pub total_requests: u64,
    pub rate_limited: u64,
    pub errors: u64,
    pub last_request_time: Option<DateTime<Utc>>,
}

/// Per-provider request counters
#[derive(Debug, Default)]
pub struct RequestMetrics {
    inner: RwLock<HashMap<Provider, ProviderMetrics>>,
}

impl RequestMetrics {
    pub async fn record(&self, provider: Provider, rate_limited: bool, error: bool) {
        let mut inner = self.inner.write().await;
        let metrics = inner.entry(provider).or_default();
        metrics.total_requests += 1;
        if rate_limited {
            metrics.rate_limited += 1;
        }
        if error {
            metrics.errors += 1;
        }
        metrics.last_request_time = Some(Utc::now());
    }

    pub async fn snapshot(&self) -> HashMap<Provider, ProviderMetrics> {
        self.inner.read().await.clone()
    }

    /// Write current counters to the log
    pub async fn log_summary(&self) {
        let snapshot = self.snapshot().await;
        if snapshot.is_empty() {
            tracing::debug!("No provider requests recorded yet");
            return;
        }
        for (provider, m) in snapshot {
            tracing::info!(
                provider = %provider,
                total = m.total_requests,
                rate_limited = m.rate_limited,
                errors = m.errors,
                "Provider request metrics"
            );
        }
    }
}

/// Log request metrics every `interval`; runs until the task is dropped
pub async fn run_metrics_monitor(metrics: Arc<RequestMetrics>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        metrics.log_summary().await;
    }
}

/// HTTP client with limiter admission and bounded retry
pub struct ResilientClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    metrics: Arc<RequestMetrics>,
}

impl ResilientClient {
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            limiter,
            policy,
            metrics: Arc::new(RequestMetrics::default()),
        })
    }

    /// Underlying client, for building requests
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    /// Send `request` to `provider` under the retry policy
    ///
    /// Non-2xx responses that are not retried (4xx, or 5xx on the last
    /// attempt) are returned as `Ok`; callers decide what they mean.
    pub async fn execute(
        &self,
        provider: Provider,
        request: RequestBuilder,
    ) -> Result<Response, ProviderError> {
        let max_retries = self.policy.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            self.limiter.admit(provider).await?;

            let attempt_request = request.try_clone().ok_or_else(|| {
                ProviderError::InvalidRequest("request body cannot be retried".to_string())
            })?;

            let response = match attempt_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    self.metrics.record(provider, false, true).await;
                    tracing::warn!(
                        provider = %provider,
                        attempt = attempt + 1,
                        max_attempts = max_retries + 1,
                        "HTTP request error: {}",
                        e
                    );
                    last_error = Some(ProviderError::TransientNetwork(e.to_string()));
                    if attempt < max_retries {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                    continue;
                }
            };

            let status = response.status();

            if is_rate_limited(status, response.headers()) {
                self.metrics.record(provider, true, false).await;
                if attempt == max_retries {
                    tracing::warn!(provider = %provider, "Rate limited after {} retries", max_retries);
                    return Err(ProviderError::RateLimited(provider));
                }
                let wait = retry_after(response.headers(), Utc::now())
                    .unwrap_or_else(|| self.policy.rate_limit_backoff(attempt));
                tracing::warn!(
                    provider = %provider,
                    attempt = attempt + 1,
                    max_attempts = max_retries + 1,
                    "Rate limited, retrying after {:?}",
                    wait
                );
                drop(response);
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() {
                self.metrics.record(provider, false, true).await;
                if attempt == max_retries {
                    return Ok(response);
                }
                tracing::warn!(
                    provider = %provider,
                    status = status.as_u16(),
                    attempt = attempt + 1,
                    max_attempts = max_retries + 1,
                    "Server error, retrying"
                );
                drop(response);
                tokio::time::sleep(self.policy.backoff(attempt)).await;
                continue;
            }

            self.metrics
                .record(provider, false, !status.is_success())
                .await;
            return Ok(response);
        }

        Err(last_error.unwrap_or(ProviderError::TransientNetwork(
            "request was never attempted".to_string(),
        )))
    }
}

fn is_rate_limited(status: reqwest::StatusCode, headers: &HeaderMap) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || headers
            .get(RATE_LIMIT_REMAINING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false)
}

/// `Retry-After` as delta-seconds or an HTTP-date; `None` when absent, unparseable or not in the future
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return (seconds > 0).then(|| Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok().filter(|d| !d.is_zero())
}
