//! Checkpointed search sweeps over a creation-date range

use super::period::{periods_needed, plan_periods, Period};
use super::{
    CollectError, DEFAULT_FILL_RATIO, DEFAULT_MAX_DEPTH, DEFAULT_PER_PAGE, DEFAULT_RESULT_CAP,
};
use crate::metrics::RunMetrics;
use crate::output::RepositorySink;
use crate::progress::{ProgressState, ProgressUnit};
use crate::request::{ApiRequest, CachePolicy, FailureKind, RequestExecutor, StatsSnapshot};
use crate::resume::{Checkpoint, CheckpointType, RunKind, RunLock, RunState, RunStatus, RunTarget};
use crate::shutdown;
use crate::RepositoryRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

const SEARCH_ENDPOINT: &str = "search/repositories";

/// What to sweep
#[derive(Debug, Clone)]
pub struct SweepRequest {
    /// Inclusive start of the creation range
    pub start: DateTime<Utc>,
    /// Exclusive end of the creation range
    pub end: DateTime<Utc>,
    /// Extra search qualifiers, e.g. `language:rust stars:>10`
    pub qualifiers: String,
}

impl SweepRequest {
    /// Qualifiers with runs of whitespace collapsed
    pub fn normalized_qualifiers(&self) -> String {
        self.qualifiers.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Result of a sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    /// Run target
    pub target: String,
    /// Final status
    pub status: RunStatus,
    /// Upfront estimate over the whole range
    pub estimated_total: u64,
    /// Repositories handed to the sink by this invocation
    pub collected: u64,
    /// Repositories collected across every invocation on this target
    pub collected_total: u64,
    /// Periods fully collected by this invocation
    pub periods_completed: u64,
    /// Periods replaced by finer ones
    pub periods_subdivided: u64,
    /// Periods still pending
    pub periods_pending: u64,
    /// Where a resumed sweep starts, if it stopped early
    pub next_period: Option<Period>,
    /// Requests answered from the cache
    pub cache_hits: u64,
    /// Calls that reached the network
    pub network_calls: u64,
    /// Checkpoint location
    pub checkpoint_path: PathBuf,
}

/// Drives a sweep, subdividing periods that hit the result cap
pub struct CollectionTracker {
    executor: Arc<RequestExecutor>,
    target: RunTarget,
    cap: u64,
    fill_ratio: f64,
    max_depth: u32,
    per_page: u32,
    cache_policy: CachePolicy,
}

/// Mutable progress of one sweep invocation
struct SweepProgress {
    state: RunState,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    qualifiers: String,
    pending: Vec<Period>,
    completed_through: Option<DateTime<Utc>>,
    estimated_total: u64,
    collected_total: u64,
}

impl SweepProgress {
    fn checkpoint(&mut self) {
        self.state.set_checkpoint(Checkpoint::new(
            CheckpointType::Period {
                range_start: self.range_start,
                range_end: self.range_end,
                qualifiers: self.qualifiers.clone(),
                pending: self.pending.clone(),
                completed_through: self.completed_through,
                estimated_total: self.estimated_total,
            },
            self.collected_total,
            0,
        ));
    }
}

enum PageFetch {
    Page(Value),
    Stop(CollectError),
    Cancelled,
}

impl CollectionTracker {
    /// Create a tracker with the default cap, fill ratio and depth bound
    pub fn new(executor: Arc<RequestExecutor>, target: RunTarget) -> Self {
        Self {
            executor,
            target,
            cap: DEFAULT_RESULT_CAP,
            fill_ratio: DEFAULT_FILL_RATIO,
            max_depth: DEFAULT_MAX_DEPTH,
            per_page: DEFAULT_PER_PAGE,
            cache_policy: CachePolicy::ReadWrite {
                ttl: Duration::from_secs(60 * 60),
                negative_ttl: None,
            },
        }
    }

    /// Override the per-query result cap
    pub fn with_cap(mut self, cap: u64) -> Self {
        self.cap = cap;
        self
    }

    /// Override the target fill ratio
    pub fn with_fill_ratio(mut self, fill_ratio: f64) -> Self {
        self.fill_ratio = fill_ratio;
        self
    }

    /// Override the subdivision depth bound
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Override the page size (the search API allows at most 100)
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    /// Override the cache policy for search pages
    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Run target
    pub fn target(&self) -> &RunTarget {
        &self.target
    }

    /// Sweep `request`, handing every repository to `sink`.
    ///
    /// With `resume`, an existing checkpoint for the same range restarts at
    /// its first pending period; otherwise the range is estimated and
    /// planned from scratch.
    pub async fn sweep<S: RepositorySink>(
        &self,
        request: &SweepRequest,
        sink: &mut S,
        resume: bool,
    ) -> Result<SweepSummary, CollectError> {
        if request.start >= request.end {
            return Err(CollectError::InvalidSweep(format!(
                "start {} is not before end {}",
                request.start, request.end
            )));
        }
        if request.start.timestamp_subsec_nanos() != 0 || request.end.timestamp_subsec_nanos() != 0 {
            return Err(CollectError::InvalidSweep(format!(
                "bounds {} and {} must fall on whole seconds",
                request.start, request.end
            )));
        }
        if self.cap == 0 || self.per_page == 0 || !(self.fill_ratio > 0.0 && self.fill_ratio <= 1.0) {
            return Err(CollectError::InvalidSweep(
                "cap and page size must be positive and the fill ratio within (0, 1]".into(),
            ));
        }

        let span = info_span!("collect", target = %self.target.name());
        self.sweep_locked(request, sink, resume).instrument(span).await
    }

    async fn sweep_locked<S: RepositorySink>(
        &self,
        request: &SweepRequest,
        sink: &mut S,
        resume: bool,
    ) -> Result<SweepSummary, CollectError> {
        let _lock = RunLock::try_acquire(&self.target.lock_path(), self.target.name())?;
        let checkpoint_path = self.target.checkpoint_path();
        let stats_before = self.executor.stats();

        let existing = if resume {
            RunState::load_optional(&checkpoint_path)?
        } else {
            None
        };

        let mut progress = match existing.and_then(|state| resumable(state, request).transpose()) {
            Some(resumed) => {
                let progress = resumed?;
                info!(
                    pending = progress.pending.len(),
                    collected_total = progress.collected_total,
                    "Resuming sweep from checkpoint"
                );
                progress
            }
            None => {
                let whole = Period::new(request.start, request.end);
                let estimated_total = match self.fetch_page(request, &whole, 1, 1).await {
                    PageFetch::Page(payload) => total_count(&payload)?,
                    PageFetch::Stop(e) => return Err(e),
                    PageFetch::Cancelled => {
                        return Err(CollectError::Aborted {
                            kind: FailureKind::Cancelled,
                            message: "shutdown requested before planning".into(),
                            next_period: None,
                        })
                    }
                };
                let pending = plan_periods(
                    request.start,
                    request.end,
                    estimated_total,
                    self.cap,
                    self.fill_ratio,
                );
                info!(
                    estimated_total = estimated_total,
                    periods = pending.len(),
                    "Planned sweep"
                );
                SweepProgress {
                    state: RunState::new(self.target.name(), RunKind::Collect),
                    range_start: request.start,
                    range_end: request.end,
                    qualifiers: request.normalized_qualifiers(),
                    pending,
                    completed_through: None,
                    estimated_total,
                    collected_total: 0,
                }
            }
        };

        let run_metrics = RunMetrics::start("collect", self.target.name());
        progress.state.set_status(RunStatus::Running, None);
        progress.checkpoint();
        progress.state.save(&checkpoint_path)?;

        let mut summary = SweepSummary {
            target: self.target.name().to_string(),
            status: RunStatus::Running,
            estimated_total: progress.estimated_total,
            collected: 0,
            collected_total: progress.collected_total,
            periods_completed: 0,
            periods_subdivided: 0,
            periods_pending: progress.pending.len() as u64,
            next_period: None,
            cache_hits: 0,
            network_calls: 0,
            checkpoint_path: checkpoint_path.clone(),
        };
        let mut reporter = ProgressState::new(
            Some(progress.estimated_total.saturating_sub(progress.collected_total)),
            ProgressUnit::Repositories,
        );

        while let Some(period) = progress.pending.first().copied() {
            if shutdown::is_requested(self.executor.shutdown()) {
                return self.interrupt(progress, summary, stats_before, &run_metrics);
            }

            let first = match self.fetch_page(request, &period, 1, self.per_page).await {
                PageFetch::Page(payload) => payload,
                PageFetch::Cancelled => {
                    return self.interrupt(progress, summary, stats_before, &run_metrics)
                }
                PageFetch::Stop(e) => return Err(self.abort(progress, e, &run_metrics)),
            };
            let total = match total_count(&first) {
                Ok(total) => total,
                Err(e) => return Err(self.abort(progress, e, &run_metrics)),
            };

            if total >= self.cap {
                if period.is_atomic() || period.depth >= self.max_depth {
                    let err = CollectError::PeriodTooDense { period, total };
                    return Err(self.abort(progress, err, &run_metrics));
                }
                let parts = periods_needed(total, self.cap, self.fill_ratio).max(2);
                let children = period.split(parts);
                debug!(
                    period = %period,
                    total = total,
                    children = children.len(),
                    depth = period.depth + 1,
                    "Subdividing dense period"
                );
                progress.pending.splice(0..1, children);
                summary.periods_subdivided += 1;
                progress.checkpoint();
                if let Err(e) = progress.state.save(&checkpoint_path) {
                    return Err(self.abort(progress, e.into(), &run_metrics));
                }
                continue;
            }

            let mut collected = 0u64;
            let mut page = first;
            let mut page_number = 1u32;
            loop {
                let items = page
                    .get("items")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for item in items {
                    match RepositoryRecord::from_search_item(item) {
                        Some(record) => {
                            if let Err(e) = sink.write_repository(&record) {
                                let err = storage_error(format!("repository sink: {e}"), period);
                                return Err(self.abort(progress, err, &run_metrics));
                            }
                            collected += 1;
                        }
                        None => warn!(period = %period, "Skipping search item without required fields"),
                    }
                }

                let short_page = (items.len() as u64) < u64::from(self.per_page);
                let seen = u64::from(page_number) * u64::from(self.per_page);
                if short_page || seen >= total {
                    break;
                }
                if shutdown::is_requested(self.executor.shutdown()) {
                    return self.interrupt(progress, summary, stats_before, &run_metrics);
                }

                page_number += 1;
                page = match self.fetch_page(request, &period, page_number, self.per_page).await {
                    PageFetch::Page(payload) => payload,
                    PageFetch::Cancelled => {
                        return self.interrupt(progress, summary, stats_before, &run_metrics)
                    }
                    PageFetch::Stop(e) => return Err(self.abort(progress, e, &run_metrics)),
                };
            }

            if let Err(e) = sink.commit() {
                let err = storage_error(format!("repository sink: {e}"), period);
                return Err(self.abort(progress, err, &run_metrics));
            }

            progress.pending.remove(0);
            progress.completed_through = Some(period.end);
            progress.collected_total += collected;
            progress.checkpoint();
            if let Err(e) = progress.state.save(&checkpoint_path) {
                return Err(self.abort(progress, e.into(), &run_metrics));
            }

            summary.collected += collected;
            summary.periods_completed += 1;
            debug!(period = %period, collected = collected, reported = total, "Period collected");

            reporter.update(collected);
            reporter.set_phase(Some(format!("{} periods pending", progress.pending.len())));
            if reporter.should_emit_update() || progress.pending.is_empty() {
                info!("{}", reporter.format_progress());
                reporter.mark_emitted();
            }
        }

        progress.state.set_status(RunStatus::Completed, None);
        progress.state.save(&checkpoint_path)?;

        summary.status = RunStatus::Completed;
        summary.collected_total = progress.collected_total;
        summary.periods_pending = 0;
        fill_stats(&mut summary, self.executor.stats().since(&stats_before));
        run_metrics.record_success(summary.collected);
        info!(
            collected = summary.collected,
            collected_total = summary.collected_total,
            periods_subdivided = summary.periods_subdivided,
            "Sweep completed"
        );
        Ok(summary)
    }

    async fn fetch_page(
        &self,
        request: &SweepRequest,
        period: &Period,
        page: u32,
        per_page: u32,
    ) -> PageFetch {
        let qualifiers = request.normalized_qualifiers();
        let query = if qualifiers.is_empty() {
            period.search_qualifier()
        } else {
            format!("{} {}", qualifiers, period.search_qualifier())
        };
        let api_request = ApiRequest::get(SEARCH_ENDPOINT)
            .param("q", query)
            .param("per_page", per_page)
            .param("page", page)
            .with_cache_policy(self.cache_policy);

        match self.executor.execute(&api_request).await {
            Ok(response) => PageFetch::Page(response.payload),
            Err(e) if e.kind() == FailureKind::Cancelled => PageFetch::Cancelled,
            Err(e) => PageFetch::Stop(CollectError::Aborted {
                kind: e.kind(),
                message: e.to_string(),
                next_period: Some(*period),
            }),
        }
    }

    fn interrupt(
        &self,
        mut progress: SweepProgress,
        mut summary: SweepSummary,
        stats_before: StatsSnapshot,
        run_metrics: &RunMetrics,
    ) -> Result<SweepSummary, CollectError> {
        progress
            .state
            .set_status(RunStatus::Interrupted, Some("shutdown requested".into()));
        progress.state.save(&self.target.checkpoint_path())?;

        summary.status = RunStatus::Interrupted;
        summary.collected_total = progress.collected_total;
        summary.periods_pending = progress.pending.len() as u64;
        summary.next_period = progress.pending.first().copied();
        fill_stats(&mut summary, self.executor.stats().since(&stats_before));
        run_metrics.record_success(summary.collected);
        warn!(
            next_period = ?summary.next_period.map(|p| p.to_string()),
            "Sweep interrupted"
        );
        Ok(summary)
    }

    fn abort(
        &self,
        mut progress: SweepProgress,
        error: CollectError,
        run_metrics: &RunMetrics,
    ) -> CollectError {
        progress
            .state
            .set_status(RunStatus::Interrupted, Some(error.to_string()));
        if let Err(e) = progress.state.save(&self.target.checkpoint_path()) {
            warn!(error = %e, "Failed to record aborted status");
        }
        run_metrics.record_failure(&error.to_string());
        error
    }
}

/// Rebuild progress from a saved state when it belongs to this range.
///
/// `Ok(None)` means there is nothing to resume and the sweep plans afresh.
fn resumable(state: RunState, request: &SweepRequest) -> Result<Option<SweepProgress>, CollectError> {
    let (range_start, range_end, qualifiers, pending, completed_through, estimated_total, collected_total) =
        match state.checkpoint() {
            Some(checkpoint) => match checkpoint.checkpoint_type() {
                CheckpointType::Period {
                    range_start,
                    range_end,
                    qualifiers,
                    pending,
                    completed_through,
                    estimated_total,
                } => (
                    *range_start,
                    *range_end,
                    qualifiers.clone(),
                    pending.clone(),
                    *completed_through,
                    *estimated_total,
                    checkpoint.processed(),
                ),
                CheckpointType::Batch { .. } => {
                    return Err(CollectError::CheckpointMismatch(
                        "target holds an enrichment checkpoint".into(),
                    ))
                }
            },
            None => return Ok(None),
        };

    if range_start != request.start || range_end != request.end {
        return Err(CollectError::CheckpointMismatch(format!(
            "checkpoint covers {} to {}, this sweep covers {} to {}",
            range_start, range_end, request.start, request.end
        )));
    }
    let requested = request.normalized_qualifiers();
    if qualifiers != requested {
        return Err(CollectError::CheckpointMismatch(format!(
            "checkpoint was swept with qualifiers {qualifiers:?}, this sweep uses {requested:?}"
        )));
    }

    Ok(Some(SweepProgress {
        state,
        range_start,
        range_end,
        qualifiers,
        pending,
        completed_through,
        estimated_total,
        collected_total,
    }))
}

fn total_count(payload: &Value) -> Result<u64, CollectError> {
    payload
        .get("total_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| CollectError::Aborted {
            kind: FailureKind::MalformedResponse,
            message: "search response without total_count".into(),
            next_period: None,
        })
}

fn storage_error(message: String, period: Period) -> CollectError {
    CollectError::Aborted {
        kind: FailureKind::StorageUnavailable,
        message,
        next_period: Some(period),
    }
}

fn fill_stats(summary: &mut SweepSummary, delta: StatsSnapshot) {
    summary.cache_hits = delta.cache_hits;
    summary.network_calls = delta.network_calls;
}
