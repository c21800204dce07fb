//! Operational metrics for the ingestion engine
//!
//! Counters and gauges are emitted through the `metrics` facade and become
//! visible once [`init_metrics`] installs the Prometheus exporter. Without an
//! installed recorder every call is a cheap no-op, which is what library
//! users and tests get.
//!
//! Emitted series:
//! - `github_requests_total{endpoint,outcome}` and `github_request_duration_seconds`
//! - `cache_lookups_total{endpoint,result}`
//! - `rate_limited_total{credential}`, `credential_quota_remaining{credential}`
//! - `quota_wait_seconds`, `retry_backoff_seconds`, `retries_total`
//! - `enrichment_batches_total{target}`, `enrichment_items_total{target,result}`
//! - `runs_completed_total`, `runs_failed_total`

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));

/// Install the Prometheus exporter and describe every series.
///
/// Idempotent: a second call is a no-op.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics exporter on {}", addr);

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(format!("Failed to install Prometheus exporter: {e}").into());
    }

    describe_counter!(
        "github_requests_total",
        Unit::Count,
        "Network calls issued to the GitHub API, by classified outcome"
    );
    describe_histogram!(
        "github_request_duration_seconds",
        Unit::Seconds,
        "Duration of individual GitHub API calls"
    );
    describe_counter!(
        "cache_lookups_total",
        Unit::Count,
        "Response cache lookups by result (hit/miss)"
    );
    describe_counter!(
        "rate_limited_total",
        Unit::Count,
        "Rate-limited responses per credential"
    );
    describe_gauge!(
        "credential_quota_remaining",
        Unit::Count,
        "Last reported remaining quota per credential"
    );
    describe_histogram!(
        "quota_wait_seconds",
        Unit::Seconds,
        "Time suspended waiting for any credential to regain quota"
    );
    describe_counter!("retries_total", Unit::Count, "Transient-failure retries");
    describe_histogram!(
        "retry_backoff_seconds",
        Unit::Seconds,
        "Backoff applied before a retry"
    );
    describe_counter!(
        "enrichment_batches_total",
        Unit::Count,
        "Enrichment batches committed"
    );
    describe_counter!(
        "enrichment_items_total",
        Unit::Count,
        "Enrichment items by result (succeeded/failed)"
    );
    describe_counter!("runs_completed_total", Unit::Count, "Runs that completed");
    describe_counter!("runs_failed_total", Unit::Count, "Runs aborted by a fatal error");

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let n = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{n:08x}")
}

/// Timing and outcome of a single network call
pub struct RequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl RequestMetrics {
    /// Start timing a call
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();
        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt = attempt,
            "Issuing request"
        );
        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record the classified outcome (`success`, `rate_limited`, ...)
    pub fn record_outcome(&self, outcome: &'static str) {
        let duration = self.start_time.elapsed();
        counter!(
            "github_requests_total",
            "endpoint" => self.endpoint.clone(),
            "outcome" => outcome,
        )
        .increment(1);
        histogram!(
            "github_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            outcome = outcome,
            duration_ms = duration.as_millis() as u64,
            "Request completed"
        );
    }

    /// Correlation ID attached to this call's log lines
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a response cache lookup
pub fn record_cache_lookup(endpoint: &str, hit: bool) {
    counter!(
        "cache_lookups_total",
        "endpoint" => endpoint.to_string(),
        "result" => if hit { "hit" } else { "miss" },
    )
    .increment(1);
}

/// Record a rate-limited response for a credential
pub fn record_rate_limited(credential: &str) {
    counter!("rate_limited_total", "credential" => credential.to_string()).increment(1);
}

/// Record the quota reported for a credential
pub fn record_quota(credential: &str, remaining: u32) {
    gauge!("credential_quota_remaining", "credential" => credential.to_string())
        .set(remaining as f64);
}

/// Record a pool-wide suspension while waiting for quota
pub fn record_quota_wait(wait: Duration) {
    histogram!("quota_wait_seconds").record(wait.as_secs_f64());
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("retry_backoff_seconds").record(duration.as_secs_f64());
    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Record a committed enrichment batch
pub fn record_batch(target: &str, succeeded: u64, failed: u64) {
    counter!("enrichment_batches_total", "target" => target.to_string()).increment(1);
    counter!(
        "enrichment_items_total",
        "target" => target.to_string(),
        "result" => "succeeded",
    )
    .increment(succeeded);
    counter!(
        "enrichment_items_total",
        "target" => target.to_string(),
        "result" => "failed",
    )
    .increment(failed);
}

/// Run-level metrics for an enrichment run or a collection sweep
pub struct RunMetrics {
    kind: &'static str,
    target: String,
    start_time: Instant,
}

impl RunMetrics {
    /// Start tracking a run
    pub fn start(kind: &'static str, target: impl Into<String>) -> Self {
        let target = target.into();
        info!(kind = kind, target = %target, "Run started");
        Self {
            kind,
            target,
            start_time: Instant::now(),
        }
    }

    /// Record a run that finished (completed or cleanly interrupted)
    pub fn record_success(&self, items: u64) {
        counter!(
            "runs_completed_total",
            "kind" => self.kind,
            "target" => self.target.clone(),
        )
        .increment(1);
        info!(
            kind = self.kind,
            target = %self.target,
            items = items,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Run finished"
        );
    }

    /// Record a run aborted by a fatal error
    pub fn record_failure(&self, error: &str) {
        counter!(
            "runs_failed_total",
            "kind" => self.kind,
            "target" => self.target.clone(),
        )
        .increment(1);
        error!(
            kind = self.kind,
            target = %self.target,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Run aborted"
        );
    }
}

/// Warn when a credential drops under `threshold_percent` of its limit
pub fn warn_on_low_quota(credential: &str, remaining: u32, limit: u32, threshold_percent: f64) {
    if limit == 0 {
        return;
    }
    let remaining_percent = remaining as f64 / limit as f64 * 100.0;
    if remaining_percent < threshold_percent {
        warn!(
            credential = credential,
            remaining = remaining,
            limit = limit,
            remaining_percent = remaining_percent,
            "Credential quota running low"
        );
    }
}
