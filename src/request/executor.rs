//! Cache-aware, quota-aware request execution

use super::call::{ApiRequest, CachePolicy};
use super::config::{RetryPolicy, DEFAULT_RATE_LIMIT_PAUSE};
use super::outcome::{classify, classify_transport_error, Outcome};
use super::transport::Transport;
use super::RequestError;
use crate::cache::{CacheKey, CachedPayload, ResponseCache};
use crate::credentials::{CredentialPool, PoolError};
use crate::metrics::{self, RequestMetrics};
use crate::shutdown::{self, SharedShutdown};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Low-quota warning threshold, in percent of the window
const LOW_QUOTA_PERCENT: f64 = 5.0;

/// Payload returned to callers
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// Parsed body (GraphQL: the `data` object)
    pub payload: Value,
    /// Served from the cache without a network call
    pub from_cache: bool,
}

/// Running counters for one executor
#[derive(Debug, Default)]
pub struct ExecutorStats {
    network_calls: AtomicU64,
    cache_hits: AtomicU64,
    rate_limited: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`ExecutorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls that reached the transport
    pub network_calls: u64,
    /// Requests answered from the cache
    pub cache_hits: u64,
    /// Rate-limited responses absorbed
    pub rate_limited: u64,
    /// Transient-failure retries
    pub retries: u64,
}

impl StatsSnapshot {
    /// Counter growth since `earlier`
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            network_calls: self.network_calls.saturating_sub(earlier.network_calls),
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            rate_limited: self.rate_limited.saturating_sub(earlier.rate_limited),
            retries: self.retries.saturating_sub(earlier.retries),
        }
    }
}

impl ExecutorStats {
    /// Copy the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            network_calls: self.network_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Executes logical requests on behalf of every ingestion component
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    pool: Arc<CredentialPool>,
    cache: Option<ResponseCache>,
    retry: RetryPolicy,
    shutdown: Option<SharedShutdown>,
    stats: ExecutorStats,
}

impl RequestExecutor {
    /// Executor without a cache, with default retry policy
    pub fn new(transport: Arc<dyn Transport>, pool: Arc<CredentialPool>) -> Self {
        Self {
            transport,
            pool,
            cache: None,
            retry: RetryPolicy::default(),
            shutdown: None,
            stats: ExecutorStats::default(),
        }
    }

    /// Attach a response cache
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override retry and rate-limit bounds
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Observe a shutdown handle during waits and backoff
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Credential pool in use
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Shutdown handle, if any
    pub fn shutdown(&self) -> Option<&SharedShutdown> {
        self.shutdown.as_ref()
    }

    /// Current counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Execute `request` until it succeeds or fails permanently.
    ///
    /// Rate limits never spend the retry budget. Transient failures retry up
    /// to `max_retries` times with exponential backoff. A cache hit returns
    /// without a network call and without consuming quota.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, RequestError> {
        let endpoint = request.endpoint();
        let policy = request.cache_policy();
        let key = request.cache_key();

        if let CachePolicy::ReadWrite { .. } = policy {
            if let Some(cached) = self.lookup(&key, &endpoint) {
                ExecutorStats::bump(&self.stats.cache_hits);
                return match cached {
                    CachedPayload::Success { body } => Ok(ApiResponse {
                        payload: body,
                        from_cache: true,
                    }),
                    CachedPayload::Failure { status, message } => {
                        Err(RequestError::PermanentClient { status, message })
                    }
                };
            }
        }

        let shutdown = self.shutdown.as_ref();
        let mut retries: u32 = 0;
        let mut rate_limit_rounds: u32 = 0;

        loop {
            if shutdown::is_requested(shutdown) {
                return Err(RequestError::Cancelled);
            }

            let credential = self.pool.acquire(shutdown).await.map_err(|e| match e {
                PoolError::Cancelled => RequestError::Cancelled,
                other => RequestError::Credentials(other),
            })?;

            let attempt = retries + rate_limit_rounds + 1;
            let call_metrics = RequestMetrics::start(endpoint.as_str(), attempt);
            ExecutorStats::bump(&self.stats.network_calls);

            let sent = shutdown::run_or_shutdown(
                self.transport.send(request, credential.token()),
                shutdown,
            )
            .await
            .ok_or(RequestError::Cancelled)?;

            let (outcome, retry_after, reset_at) = match sent {
                Ok(raw) => {
                    if let Some(quota) = raw.quota {
                        self.pool
                            .record_usage(credential.id(), quota.remaining, quota.reset_at);
                        if let Some(limit) = quota.limit {
                            metrics::warn_on_low_quota(
                                credential.id().as_str(),
                                quota.remaining,
                                limit,
                                LOW_QUOTA_PERCENT,
                            );
                        }
                    }
                    (
                        classify(&raw, request.is_graphql()),
                        raw.retry_after,
                        raw.quota.map(|q| q.reset_at),
                    )
                }
                Err(e) => (classify_transport_error(&e), None, None),
            };
            call_metrics.record_outcome(outcome.label());

            match outcome {
                Outcome::Success(payload) => {
                    self.store_success(&key, &endpoint, policy, &payload);
                    return Ok(ApiResponse {
                        payload,
                        from_cache: false,
                    });
                }
                Outcome::RateLimited => {
                    ExecutorStats::bump(&self.stats.rate_limited);
                    metrics::record_rate_limited(credential.id().as_str());
                    rate_limit_rounds += 1;
                    if rate_limit_rounds >= self.retry.max_rate_limit_rounds {
                        warn!(
                            endpoint = %endpoint,
                            rounds = rate_limit_rounds,
                            "Rate-limit round bound reached"
                        );
                        return Err(RequestError::RateLimitRoundsExceeded {
                            rounds: rate_limit_rounds,
                        });
                    }
                    let until = rate_limited_until(Utc::now(), retry_after, reset_at);
                    info!(
                        credential = %credential.id(),
                        endpoint = %endpoint,
                        until = %until,
                        "Credential rate limited, rotating"
                    );
                    self.pool.record_usage(credential.id(), 0, until);
                }
                Outcome::Transient(message) => {
                    if retries >= self.retry.max_retries {
                        warn!(
                            endpoint = %endpoint,
                            attempts = retries + 1,
                            error = %message,
                            "Retry budget exhausted"
                        );
                        return Err(RequestError::Transient {
                            attempts: retries + 1,
                            message,
                        });
                    }
                    let backoff = self.retry.backoff(retries);
                    retries += 1;
                    ExecutorStats::bump(&self.stats.retries);
                    metrics::record_retry_backoff(backoff, retries);
                    warn!(
                        endpoint = %endpoint,
                        retry = retries,
                        max_retries = self.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %message,
                        "Transient failure, backing off"
                    );
                    if !shutdown::sleep_or_shutdown(backoff, shutdown).await {
                        return Err(RequestError::Cancelled);
                    }
                }
                Outcome::PermanentClient { status, message } => {
                    debug!(endpoint = %endpoint, status = status, "Permanent client error");
                    self.store_failure(&key, &endpoint, policy, status, &message);
                    return Err(RequestError::PermanentClient { status, message });
                }
                Outcome::Malformed(message) => {
                    warn!(endpoint = %endpoint, error = %message, "Malformed response");
                    return Err(RequestError::Malformed(message));
                }
            }
        }
    }

    /// Cache lookup; I/O problems degrade to a miss
    fn lookup(&self, key: &CacheKey, endpoint: &str) -> Option<CachedPayload> {
        let cache = self.cache.as_ref()?;
        match cache.get(key) {
            Ok(hit) => {
                metrics::record_cache_lookup(endpoint, hit.is_some());
                if hit.is_some() {
                    debug!(key = %key, endpoint = endpoint, "Cache hit");
                }
                hit
            }
            Err(e) => {
                warn!(key = %key, endpoint = endpoint, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    fn store_success(&self, key: &CacheKey, endpoint: &str, policy: CachePolicy, payload: &Value) {
        let ttl = match policy {
            CachePolicy::ReadWrite { ttl, .. } | CachePolicy::Refresh { ttl } => ttl,
            CachePolicy::Bypass => return,
        };
        self.store(key, endpoint, CachedPayload::Success { body: payload.clone() }, ttl);
    }

    fn store_failure(&self, key: &CacheKey, endpoint: &str, policy: CachePolicy, status: u16, message: &str) {
        if let CachePolicy::ReadWrite {
            negative_ttl: Some(ttl),
            ..
        } = policy
        {
            let payload = CachedPayload::Failure {
                status,
                message: message.to_string(),
            };
            self.store(key, endpoint, payload, ttl);
        }
    }

    fn store(&self, key: &CacheKey, endpoint: &str, payload: CachedPayload, ttl: Duration) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(key, endpoint, payload, ttl) {
                warn!(key = %key, endpoint = endpoint, error = %e, "Cache write failed");
            }
        }
    }
}

/// When a rate-limited credential may be used again.
///
/// `retry-after` wins (secondary limits), then a reset instant still in the
/// future, then a fixed pause.
fn rate_limited_until(
    now: DateTime<Utc>,
    retry_after: Option<Duration>,
    reset_at: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let pause = |d: Duration| now + chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
    if let Some(retry_after) = retry_after {
        return pause(retry_after);
    }
    match reset_at {
        Some(reset) if reset > now => reset,
        _ => pause(DEFAULT_RATE_LIMIT_PAUSE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_until_prefers_retry_after() {
        let now = Utc::now();
        let reset = now + chrono::Duration::minutes(30);
        assert_eq!(
            rate_limited_until(now, Some(Duration::from_secs(5)), Some(reset)),
            now + chrono::Duration::seconds(5)
        );
        assert_eq!(rate_limited_until(now, None, Some(reset)), reset);
    }

    #[test]
    fn test_rate_limited_until_defaults_when_reset_passed() {
        let now = Utc::now();
        let stale = now - chrono::Duration::seconds(1);
        assert_eq!(
            rate_limited_until(now, None, Some(stale)),
            now + chrono::Duration::seconds(60)
        );
        assert_eq!(
            rate_limited_until(now, None, None),
            now + chrono::Duration::seconds(60)
        );
    }

    #[test]
    fn test_stats_delta() {
        let before = StatsSnapshot { network_calls: 3, cache_hits: 1, rate_limited: 0, retries: 2 };
        let after = StatsSnapshot { network_calls: 7, cache_hits: 4, rate_limited: 1, retries: 2 };
        assert_eq!(
            after.since(&before),
            StatsSnapshot { network_calls: 4, cache_hits: 3, rate_limited: 1, retries: 0 }
        );
    }
}
