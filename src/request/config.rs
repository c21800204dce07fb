//! Request execution configuration constants

use std::time::Duration;

/// Maximum number of retries for transient failures.
/// 5 retries with exponential backoff rides out short GitHub 5xx bursts
/// without looping on a persistently failing endpoint (max total wait ~1 minute).
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// Retry 5 would be 32s, capped to 30s.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Upper bound on rate-limit rounds for a single request.
/// Rate limits never spend the retry budget, so this is the only thing
/// that keeps a misbehaving server from holding a request forever.
pub const MAX_RATE_LIMIT_ROUNDS: u32 = 1000;

/// Suspension applied to a credential when the server signals a rate limit
/// without reporting a reset instant or `retry-after`.
pub const DEFAULT_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(60);

/// Default TTL for cached successful responses.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default TTL for cached negative results (404, geocoder misses).
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default number of work items per enrichment batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default number of in-flight requests inside one enrichment batch.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Per-call HTTP timeout for the GitHub transport.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry and rate-limit bounds applied by the request executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt for transient failures
    pub max_retries: u32,
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Rate-limit rounds tolerated before giving up
    pub max_rate_limit_rounds: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            max_rate_limit_rounds: MAX_RATE_LIMIT_ROUNDS,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry_count` (0-based): `initial * 2^n`, capped
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the backoff bounds
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}
