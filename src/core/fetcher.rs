use crate::core::cache::{Fingerprint, ResponseCache};
use crate::core::rate_limiter::{Acquire, QuotaLimiter};
use crate::domain::ports::ApiResponse;
use crate::utils::error::{FetchError, FetchErrorKind};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; 0 disables retrying.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// base × 2^retry, capped, plus up to 10% jitter.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_index);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = capped.as_millis() as u64 / 10;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        capped + jitter
    }
}

/// A successful fetch, with the retry trail for run reporting.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: serde_json::Value,
    pub from_cache: bool,
    pub retries: u32,
    pub delays: Vec<Duration>,
}

/// Wraps one logical API operation with cache lookup, quota acquisition and
/// bounded retry. Composition over annotation: the operation is a plain
/// closure receiving the granted API key.
pub struct RetryingFetcher {
    limiter: Arc<QuotaLimiter>,
    cache: Arc<ResponseCache>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryingFetcher {
    pub fn new(
        limiter: Arc<QuotaLimiter>,
        cache: Arc<ResponseCache>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            limiter,
            cache,
            policy,
            cancel,
        }
    }

    /// Cache-first fetch. A hit returns without touching the rate limiter.
    /// On miss, quota is acquired and the operation performed; retryable
    /// failures (and limiter wait/exhausted signals) back off exponentially
    /// until the attempt budget runs out.
    pub async fn fetch<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        cost: u64,
        ttl: Duration,
        bypass_cache: bool,
        op: F,
    ) -> Result<Fetched, FetchError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<ApiResponse, FetchError>>,
    {
        if !bypass_cache {
            if let Some(payload) = self.cache.get(&fingerprint).await {
                tracing::debug!(fingerprint = %fingerprint, "cache hit");
                return Ok(Fetched {
                    payload,
                    from_cache: true,
                    retries: 0,
                    delays: Vec::new(),
                });
            }
        }

        let mut retries = 0u32;
        let mut delays: Vec<Duration> = Vec::new();
        let mut last_err = FetchError::new(FetchErrorKind::ServerError, "no attempt made");
        let mut wait_hint: Option<Duration> = None;

        for attempt in 0..=self.policy.max_attempts {
            if attempt > 0 {
                let mut delay = self.policy.delay_for(attempt - 1);
                if let Some(hint) = wait_hint.take() {
                    delay = delay.max(hint);
                }
                tracing::debug!(
                    fingerprint = %fingerprint,
                    attempt,
                    ?delay,
                    "backing off before retry"
                );
                delays.push(delay);
                self.sleep(delay).await?;
                retries += 1;
            }

            let grant = match self.limiter.acquire(cost).await {
                Acquire::Granted(grant) => grant,
                Acquire::Wait(wait) => {
                    wait_hint = Some(wait);
                    last_err = FetchError::new(
                        FetchErrorKind::RateLimited,
                        format!("quota unavailable for {:?}", wait),
                    );
                    continue;
                }
                Acquire::Exhausted => {
                    last_err = FetchError::new(
                        FetchErrorKind::RateLimited,
                        "all credential slots exhausted",
                    );
                    continue;
                }
            };

            match op(grant.api_key.clone()).await {
                Ok(response) => {
                    if response.quota_remaining.is_some() || response.quota_reset.is_some() {
                        self.limiter
                            .sync_server_quota(
                                &grant.slot_id,
                                response.quota_remaining,
                                response.quota_reset,
                            )
                            .await;
                    }
                    if !bypass_cache {
                        self.cache
                            .put(fingerprint, response.payload.clone(), ttl)
                            .await;
                    }
                    return Ok(Fetched {
                        payload: response.payload,
                        from_cache: false,
                        retries,
                        delays,
                    });
                }
                Err(err) if err.is_retryable() => {
                    if err.kind == FetchErrorKind::RateLimited {
                        self.limiter
                            .start_cooldown(&grant.slot_id, err.retry_after)
                            .await;
                    }
                    wait_hint = err.retry_after;
                    tracing::warn!(
                        fingerprint = %fingerprint,
                        error = %err,
                        attempt,
                        "retryable fetch failure"
                    );
                    last_err = err;
                }
                Err(err) => {
                    tracing::warn!(fingerprint = %fingerprint, error = %err, "permanent fetch failure");
                    return Err(err);
                }
            }
        }

        Err(FetchError::retries_exhausted(
            self.policy.max_attempts + 1,
            &last_err,
        ))
    }

    async fn sleep(&self, duration: Duration) -> Result<(), FetchError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(FetchError::new(
                FetchErrorKind::Cancelled,
                "run cancelled during backoff",
            )),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fetcher(max_attempts: u32) -> RetryingFetcher {
        let limiter = Arc::new(QuotaLimiter::new(
            &["test-key".to_string()],
            1_000,
            Duration::from_secs(3600),
        ));
        let cache = Arc::new(ResponseCache::new());
        RetryingFetcher::new(
            limiter,
            cache,
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(1),
            },
            CancellationToken::new(),
        )
    }

    fn fp() -> Fingerprint {
        Fingerprint::new("videos.statistics", &["v1".to_string()], None)
    }

    #[tokio::test]
    async fn test_two_timeouts_then_success_records_two_retries() {
        let fetcher = fetcher(3);
        let calls = AtomicU32::new(0);

        let result = fetcher
            .fetch(fp(), 1, Duration::from_secs(60), false, |_key| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FetchError::new(FetchErrorKind::Timeout, "timed out"))
                    } else {
                        Ok(json!({"items": [1]}).into())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.payload, json!({"items": [1]}));
        assert_eq!(result.retries, 2);
        assert!(!result.from_cache);
        assert_eq!(result.delays.len(), 2);
        assert!(result.delays[1] >= result.delays[0]);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let fetcher = fetcher(3);
        let calls = AtomicU32::new(0);

        let err = fetcher
            .fetch(fp(), 1, Duration::from_secs(60), false, |_key| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::new(FetchErrorKind::NotFound, "missing")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, FetchErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausting_retries_yields_retries_exhausted() {
        let fetcher = fetcher(2);
        let calls = AtomicU32::new(0);

        let err = fetcher
            .fetch(fp(), 1, Duration::from_secs(60), false, |_key| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::new(FetchErrorKind::ServerError, "500")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, FetchErrorKind::RetriesExhausted);
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_quota() {
        let limiter = Arc::new(QuotaLimiter::new(
            &["test-key".to_string()],
            100,
            Duration::from_secs(3600),
        ));
        let cache = Arc::new(ResponseCache::new());
        let fetcher = RetryingFetcher::new(
            limiter.clone(),
            cache.clone(),
            RetryPolicy::default(),
            CancellationToken::new(),
        );

        cache
            .put(fp(), json!({"cached": true}), Duration::from_secs(60))
            .await;

        let result = fetcher
            .fetch(fp(), 5, Duration::from_secs(60), false, |_key| async {
                panic!("operation must not run on a cache hit")
            })
            .await
            .unwrap();

        assert!(result.from_cache);
        assert_eq!(result.payload, json!({"cached": true}));
        let usage = limiter.usage().await;
        assert_eq!(usage[0].remaining, 100);
    }

    #[tokio::test]
    async fn test_bypass_cache_skips_read_and_write() {
        let limiter = Arc::new(QuotaLimiter::new(
            &["test-key".to_string()],
            100,
            Duration::from_secs(3600),
        ));
        let cache = Arc::new(ResponseCache::new());
        let fetcher = RetryingFetcher::new(
            limiter,
            cache.clone(),
            RetryPolicy::default(),
            CancellationToken::new(),
        );

        cache
            .put(fp(), json!({"cached": true}), Duration::from_secs(60))
            .await;

        let result = fetcher
            .fetch(fp(), 1, Duration::from_secs(60), true, |_key| async {
                Ok(json!({"fresh": true}).into())
            })
            .await
            .unwrap();

        assert!(!result.from_cache);
        assert_eq!(result.payload, json!({"fresh": true}));
        // The stale entry is untouched; a bypassed run does not repopulate.
        assert_eq!(cache.get(&fp()).await, Some(json!({"cached": true})));
    }

    #[tokio::test]
    async fn test_success_populates_cache() {
        let fetcher = fetcher(0);

        fetcher
            .fetch(fp(), 1, Duration::from_secs(60), false, |_key| async {
                Ok(json!({"n": 1}).into())
            })
            .await
            .unwrap();

        let second = fetcher
            .fetch(fp(), 1, Duration::from_secs(60), false, |_key| async {
                panic!("second fetch must hit the cache")
            })
            .await
            .unwrap();
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn test_server_quota_hint_adopted() {
        let limiter = Arc::new(QuotaLimiter::new(
            &["test-key".to_string()],
            100,
            Duration::from_secs(3600),
        ));
        let cache = Arc::new(ResponseCache::new());
        let fetcher = RetryingFetcher::new(
            limiter.clone(),
            cache,
            RetryPolicy::default(),
            CancellationToken::new(),
        );

        fetcher
            .fetch(fp(), 1, Duration::from_secs(60), false, |_key| async {
                Ok(ApiResponse {
                    payload: json!({}),
                    quota_remaining: Some(7),
                    quota_reset: None,
                })
            })
            .await
            .unwrap();

        let usage = limiter.usage().await;
        assert_eq!(usage[0].remaining, 7);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff() {
        let limiter = Arc::new(QuotaLimiter::new(
            &["test-key".to_string()],
            100,
            Duration::from_secs(3600),
        ));
        let cache = Arc::new(ResponseCache::new());
        let cancel = CancellationToken::new();
        let fetcher = RetryingFetcher::new(
            limiter,
            cache,
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(60),
            },
            cancel.clone(),
        );

        cancel.cancel();
        let err = fetcher
            .fetch(fp(), 1, Duration::from_secs(60), false, |_key| async {
                Err(FetchError::new(FetchErrorKind::Timeout, "timed out"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, FetchErrorKind::Cancelled);
    }
}
