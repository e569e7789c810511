//! Per-provider token bucket admission control
//!
//! Each provider gets an independent bucket (steady refill rate plus burst
//! capacity). The map lock is only held for the refill/consume arithmetic,
//! never across a sleep, so waiting on one provider never blocks another.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tunebridge_common::config::{ProviderSettings, ProvidersConfig};
use tunebridge_common::Provider;

use crate::error::ProviderError;

/// Default bound on waiting for a token
pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Snapshot of a provider's bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimiterStats {
    pub rate: f64,
    pub burst: u32,
    pub tokens_available: f64,
}

#[derive(Debug)]
struct TokenBucket {
    rate: f64,
    burst: u32,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A rate that is not a positive finite number never refills
    fn new(rate: f64, burst: u32) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 0.0 };
        Self {
            rate,
            burst,
            tokens: burst as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst as f64);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available
    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::try_from_secs_f64(deficit / self.rate).unwrap_or(Duration::MAX))
        }
    }
}

/// Token bucket rate limiter shared by every job
pub struct RateLimiter {
    buckets: Mutex<HashMap<Provider, TokenBucket>>,
    admission_timeout: Duration,
}

impl RateLimiter {
    /// Limiter with the built-in per-provider quotas
    pub fn new(admission_timeout: Duration) -> Self {
        Self::from_config(&ProvidersConfig::default(), admission_timeout)
    }

    /// Limiter with quotas from configuration (falls back to built-in quotas per field)
    pub fn from_config(providers: &ProvidersConfig, admission_timeout: Duration) -> Self {
        let mut buckets = HashMap::new();
        for provider in Provider::ALL {
            let defaults = ProviderSettings::defaults_for(provider);
            let settings = providers.get(provider);
            let rate = settings
                .requests_per_second
                .or(defaults.requests_per_second)
                .unwrap_or(1.0);
            let burst = settings.burst.or(defaults.burst).unwrap_or(1);
            buckets.insert(provider, TokenBucket::new(rate, burst.max(1)));
        }

        Self {
            buckets: Mutex::new(buckets),
            admission_timeout,
        }
    }

    /// Wait until a token is available for `provider`, up to the admission timeout
    pub async fn admit(&self, provider: Provider) -> Result<(), ProviderError> {
        let deadline = Instant::now() + self.admission_timeout;

        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                match buckets.get_mut(&provider) {
                    Some(bucket) => match bucket.take(Instant::now()) {
                        Ok(()) => return Ok(()),
                        Err(wait) => wait,
                    },
                    None => return Ok(()),
                }
            };

            if wait > deadline.saturating_duration_since(Instant::now()) {
                tracing::warn!(
                    provider = %provider,
                    timeout_secs = self.admission_timeout.as_secs_f64(),
                    "Rate limiter admission timed out"
                );
                return Err(ProviderError::RateLimitTimeout(provider));
            }

            tracing::debug!(provider = %provider, "Rate limiting: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token if one is available right now
    pub async fn try_admit(&self, provider: Provider) -> bool {
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(&provider) {
            Some(bucket) => bucket.take(Instant::now()).is_ok(),
            None => true,
        }
    }

    /// Replace a provider's rate and burst; other providers are untouched
    pub async fn configure(&self, provider: Provider, rate: f64, burst: u32) {
        let mut buckets = self.buckets.lock().await;
        if !(rate.is_finite() && rate > 0.0) {
            tracing::warn!(provider = %provider, rate, "Non-positive rate: bucket will not refill");
        }
        buckets.insert(provider, TokenBucket::new(rate, burst.max(1)));
        tracing::info!(provider = %provider, rate, burst, "Rate limiter reconfigured");
    }

    pub async fn stats(&self, provider: Provider) -> Option<LimiterStats> {
        let mut buckets = self.buckets.lock().await;
        buckets.get_mut(&provider).map(|bucket| {
            bucket.refill(Instant::now());
            LimiterStats {
                rate: bucket.rate,
                burst: bucket.burst,
                tokens_available: bucket.tokens,
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_ADMISSION_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_reject() {
        let limiter = RateLimiter::default();
        limiter.configure(Provider::Youtube, 1.0, 5).await;

        let mut admitted = Vec::new();
        for _ in 0..6 {
            admitted.push(limiter.try_admit(Provider::Youtube).await);
        }
        assert_eq!(admitted, vec![true, true, true, true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_regenerate() {
        let limiter = RateLimiter::default();
        limiter.configure(Provider::Spotify, 10.0, 1).await;

        assert!(limiter.try_admit(Provider::Spotify).await);
        assert!(!limiter.try_admit(Provider::Spotify).await);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.try_admit(Provider::Spotify).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_are_independent() {
        let limiter = RateLimiter::default();
        limiter.configure(Provider::Youtube, 1.0, 1).await;

        assert!(limiter.try_admit(Provider::Youtube).await);
        assert!(!limiter.try_admit(Provider::Youtube).await);

        // Spotify still has its full default burst
        for _ in 0..20 {
            assert!(limiter.try_admit(Provider::Spotify).await);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_waits_for_token() {
        let limiter = RateLimiter::default();
        limiter.configure(Provider::Spotify, 2.0, 1).await;
        assert!(limiter.try_admit(Provider::Spotify).await);

        let start = Instant::now();
        limiter.admit(Provider::Spotify).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_times_out() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.configure(Provider::Youtube, 0.1, 1).await;
        assert!(limiter.try_admit(Provider::Youtube).await);

        let err = limiter.admit(Provider::Youtube).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimitTimeout(Provider::Youtube)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_on_one_provider_does_not_block_another() {
        let limiter = Arc::new(RateLimiter::default());
        limiter.configure(Provider::Youtube, 0.5, 1).await;
        assert!(limiter.try_admit(Provider::Youtube).await);

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.admit(Provider::Youtube).await })
        };
        tokio::task::yield_now().await;

        assert!(limiter.try_admit(Provider::Spotify).await);
        assert!(!waiter.is_finished());
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_configure() {
        let limiter = RateLimiter::default();
        let stats = limiter.stats(Provider::Spotify).await.unwrap();
        assert_eq!(stats.rate, 10.0);
        assert_eq!(stats.burst, 20);
        assert_eq!(stats.tokens_available, 20.0);

        limiter.try_admit(Provider::Spotify).await;
        limiter.configure(Provider::Youtube, 3.0, 7).await;

        let spotify = limiter.stats(Provider::Spotify).await.unwrap();
        assert_eq!(spotify.tokens_available, 19.0);
        let youtube = limiter.stats(Provider::Youtube).await.unwrap();
        assert_eq!((youtube.rate, youtube.burst), (3.0, 7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_never_refills() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.configure(Provider::Spotify, 0.0, 1).await;

        assert!(limiter.try_admit(Provider::Spotify).await);
        assert!(!limiter.try_admit(Provider::Spotify).await);
        assert!(matches!(
            limiter.admit(Provider::Spotify).await,
            Err(ProviderError::RateLimitTimeout(Provider::Spotify))
        ));

        let stats = limiter.stats(Provider::Spotify).await.unwrap();
        assert_eq!(stats.rate, 0.0);
        assert_eq!(stats.tokens_available, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_rates_do_not_panic() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        for rate in [-5.0, f64::NAN, f64::INFINITY, 1e-300] {
            limiter.configure(Provider::Youtube, rate, 1).await;
            assert!(limiter.try_admit(Provider::Youtube).await);
            assert!(!limiter.try_admit(Provider::Youtube).await);
            assert!(limiter.admit(Provider::Youtube).await.is_err());
        }
    }
}
