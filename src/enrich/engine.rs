//! Batch partitioning, execution and checkpointing

use super::enricher::{EnrichItem, Enricher, ItemError};
use super::EnrichError;
use crate::metrics::{self, RunMetrics};
use crate::output::EntityStore;
use crate::progress::{ProgressState, ProgressUnit};
use crate::request::config::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY};
use crate::request::{FailureKind, RequestExecutor};
use crate::resume::{
    read_failed_ids, Checkpoint, CheckpointType, FailureLedger, FailureRecord, RunKind, RunLock,
    RunState, RunStatus, RunTarget,
};
use crate::shutdown;
use crate::FieldMap;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Options for one enrichment run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Items per batch
    pub batch_size: usize,
    /// Skip batches the checkpoint marks as done
    pub resume_from_checkpoint: bool,
    /// Restrict the population to ids in a prior failure ledger
    pub only_failed: bool,
    /// Ledger to read for `only_failed`; defaults to the target's own
    pub failed_ledger: Option<PathBuf>,
    /// Fetch and extract without writing the entity store
    pub dry_run: bool,
    /// In-flight requests inside one batch
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            resume_from_checkpoint: true,
            only_failed: false,
            failed_ledger: None,
            dry_run: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Result of a run, reported to the caller
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Run target the checkpoint and ledger belong to
    pub target: String,
    /// Final status
    pub status: RunStatus,
    /// Items in the (possibly filtered) population
    pub items_total: u64,
    /// Items enriched by this invocation
    pub succeeded: u64,
    /// Items that failed in this invocation
    pub failed: u64,
    /// Items in batches skipped thanks to the checkpoint
    pub skipped: u64,
    /// Requests answered from the cache
    pub cache_hits: u64,
    /// Calls that reached the network
    pub network_calls: u64,
    /// Batches in the partition
    pub batches_total: u64,
    /// Batches committed by this invocation
    pub batches_processed: u64,
    /// Batches skipped thanks to the checkpoint
    pub batches_skipped: u64,
    /// First batch still to run, if the run stopped early
    pub next_batch: Option<u64>,
    /// Where failures were recorded
    pub ledger_path: PathBuf,
    /// Whether this was a dry run
    pub dry_run: bool,
}

/// Settled result of one work item
enum ItemResult {
    Enriched(u64, FieldMap),
    Failed(u64, FailureKind, String),
    Fatal(FailureKind, String),
}

/// Runs an [`Enricher`] over a population in checkpointed batches
pub struct BatchEnrichmentEngine<E, S> {
    executor: Arc<RequestExecutor>,
    enricher: E,
    store: S,
    target: RunTarget,
}

impl<E: Enricher, S: EntityStore> BatchEnrichmentEngine<E, S> {
    /// Create an engine for `target`
    pub fn new(executor: Arc<RequestExecutor>, enricher: E, store: S, target: RunTarget) -> Self {
        Self {
            executor,
            enricher,
            store,
            target,
        }
    }

    /// Entity store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the engine, returning the entity store
    pub fn into_store(self) -> S {
        self.store
    }

    /// Enrich `population` according to `options`.
    ///
    /// Batch N's store commit, ledger append and checkpoint all complete
    /// before batch N+1 starts. A fatal error leaves the checkpoint at the
    /// last fully committed batch.
    pub async fn run(
        &mut self,
        population: Vec<E::Item>,
        options: &RunOptions,
    ) -> Result<RunSummary, EnrichError> {
        if options.batch_size == 0 {
            return Err(EnrichError::InvalidOptions("batch size must be at least 1".into()));
        }

        let mut target = self.target.clone();
        let mut population = population;
        if options.only_failed {
            let source = options
                .failed_ledger
                .clone()
                .unwrap_or_else(|| self.target.ledger_path());
            let ids = read_failed_ids(&source)?;
            population.retain(|item| ids.contains(&item.entity_id()));
            info!(
                ledger = %source.display(),
                failed_ids = ids.len(),
                matched = population.len(),
                "Restricting run to previously failed items"
            );
            target = target.retry_target();
        }
        if options.dry_run {
            target = target.dry_run_target();
        }

        let span = info_span!("enrich", target = %target.name(), dry_run = options.dry_run);
        self.run_target(target, population, options)
            .instrument(span)
            .await
    }

    async fn run_target(
        &mut self,
        target: RunTarget,
        mut population: Vec<E::Item>,
        options: &RunOptions,
    ) -> Result<RunSummary, EnrichError> {
        let _lock = RunLock::try_acquire(&target.lock_path(), target.name())?;
        let run_metrics = RunMetrics::start("enrich", target.name());

        population.sort_by_key(|item| item.entity_id());
        population.dedup_by_key(|item| item.entity_id());
        let digest = population_digest(&population);
        let batches: Vec<&[E::Item]> = population.chunks(options.batch_size).collect();
        let total_batches = batches.len() as u64;

        let checkpoint_path = target.checkpoint_path();
        let ledger = FailureLedger::new(target.ledger_path());

        let existing = if options.resume_from_checkpoint {
            RunState::load_optional(&checkpoint_path)?
        } else {
            None
        };
        // Retry and dry-run targets only resume unfinished work; a completed
        // one would otherwise skip every batch of the next invocation.
        let rerunnable = options.only_failed || options.dry_run;
        let existing = existing.filter(|state| {
            let finished = rerunnable && state.status() == RunStatus::Completed;
            if finished {
                debug!(target_name = %target.name(), "Previous run completed, starting fresh");
            }
            !finished
        });

        let (mut state, start_batch, mut processed, mut failed_total) = match existing {
            Some(state) => {
                let resume_point = match state.checkpoint() {
                    Some(checkpoint) => match checkpoint.checkpoint_type() {
                        CheckpointType::Batch {
                            last_completed,
                            batch_size,
                            population_digest,
                            ..
                        } => {
                            if *batch_size != options.batch_size || *population_digest != digest {
                                return Err(EnrichError::CheckpointMismatch(format!(
                                    "checkpoint was written for batch size {} and population {}, this run uses batch size {} and population {}",
                                    batch_size, population_digest, options.batch_size, digest
                                )));
                            }
                            (last_completed + 1, checkpoint.processed(), checkpoint.failed())
                        }
                        CheckpointType::Period { .. } => {
                            return Err(EnrichError::CheckpointMismatch(
                                "target holds a collection sweep checkpoint".into(),
                            ));
                        }
                    },
                    None => (0, 0, 0),
                };
                info!(
                    resume_from_batch = resume_point.0,
                    total_batches = total_batches,
                    "Resuming from checkpoint"
                );
                (state, resume_point.0, resume_point.1, resume_point.2)
            }
            None => {
                if let Some(rotated) = ledger.rotate()? {
                    info!(rotated = %rotated.display(), "Previous failure ledger kept");
                }
                (RunState::new(target.name(), RunKind::Enrich), 0, 0, 0)
            }
        };

        let skipped_batches = start_batch.min(total_batches);
        let skipped_items: u64 = batches
            .iter()
            .take(skipped_batches as usize)
            .map(|b| b.len() as u64)
            .sum();

        let mut summary = RunSummary {
            target: target.name().to_string(),
            status: RunStatus::Running,
            items_total: population.len() as u64,
            succeeded: 0,
            failed: 0,
            skipped: skipped_items,
            cache_hits: 0,
            network_calls: 0,
            batches_total: total_batches,
            batches_processed: 0,
            batches_skipped: skipped_batches,
            next_batch: None,
            ledger_path: ledger.path().to_path_buf(),
            dry_run: options.dry_run,
        };

        state.set_status(RunStatus::Running, None);
        state.save(&checkpoint_path)?;

        let stats_before = self.executor.stats();
        let mut progress = ProgressState::new(
            Some(population.len() as u64 - skipped_items),
            ProgressUnit::WorkItems,
        );
        let concurrency = options.concurrency.max(1);

        for batch_index in start_batch..total_batches {
            if shutdown::is_requested(self.executor.shutdown()) {
                return self.interrupt(state, &checkpoint_path, summary, batch_index, stats_before, &run_metrics);
            }

            let batch = batches[batch_index as usize];
            debug!(batch = batch_index, items = batch.len(), "Processing batch");

            let executor = self.executor.as_ref();
            let enricher = &self.enricher;
            let results: Vec<ItemResult> = stream::iter(batch.iter())
                .map(|item| process_item(executor, enricher, item))
                .buffer_unordered(concurrency)
                .collect()
                .await;

            let mut enriched = Vec::new();
            let mut failures = Vec::new();
            let mut fatal = None;
            for result in results {
                match result {
                    ItemResult::Enriched(id, fields) => enriched.push((id, fields)),
                    ItemResult::Failed(id, kind, message) => {
                        failures.push(FailureRecord::new(id, kind, message, batch_index))
                    }
                    ItemResult::Fatal(kind, message) => {
                        fatal.get_or_insert((kind, message));
                    }
                }
            }

            if let Some((kind, message)) = fatal {
                if kind == FailureKind::Cancelled {
                    return self.interrupt(state, &checkpoint_path, summary, batch_index, stats_before, &run_metrics);
                }
                return Err(self.abort(state, &checkpoint_path, kind, message, batch_index, &run_metrics));
            }

            enriched.sort_by_key(|(id, _)| *id);
            failures.sort_by_key(|r| r.entity_id);

            if !options.dry_run {
                let committed = enriched
                    .iter()
                    .try_for_each(|(id, fields)| self.store.upsert_derived_fields(*id, fields))
                    .and_then(|_| self.store.commit());
                if let Err(e) = committed {
                    return Err(self.abort(
                        state,
                        &checkpoint_path,
                        FailureKind::StorageUnavailable,
                        format!("entity store: {e}"),
                        batch_index,
                        &run_metrics,
                    ));
                }
            }

            if let Err(e) = ledger.append(&failures) {
                return Err(self.abort(
                    state,
                    &checkpoint_path,
                    FailureKind::StorageUnavailable,
                    format!("failure ledger: {e}"),
                    batch_index,
                    &run_metrics,
                ));
            }

            processed += batch.len() as u64;
            failed_total += failures.len() as u64;
            state.set_checkpoint(
                Checkpoint::new(
                    CheckpointType::Batch {
                        last_completed: batch_index,
                        total_batches,
                        batch_size: options.batch_size,
                        population_digest: digest.clone(),
                    },
                    processed,
                    failed_total,
                )
                .with_ledger_path(ledger.path()),
            );
            if let Err(e) = state.save(&checkpoint_path) {
                return Err(self.abort(
                    state,
                    &checkpoint_path,
                    FailureKind::StorageUnavailable,
                    format!("checkpoint: {e}"),
                    batch_index,
                    &run_metrics,
                ));
            }

            summary.succeeded += enriched.len() as u64;
            summary.failed += failures.len() as u64;
            summary.batches_processed += 1;
            metrics::record_batch(target.name(), enriched.len() as u64, failures.len() as u64);

            progress.update(batch.len() as u64);
            progress.set_phase(Some(format!("batch {}/{}", batch_index + 1, total_batches)));
            if progress.should_emit_update() || batch_index + 1 == total_batches {
                info!("{}", progress.format_progress());
                progress.mark_emitted();
            }
        }

        state.set_status(RunStatus::Completed, None);
        state.save(&checkpoint_path)?;

        fill_stats(&mut summary, self.executor.stats().since(&stats_before));
        summary.status = RunStatus::Completed;
        run_metrics.record_success(summary.succeeded + summary.failed);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            ledger = %summary.ledger_path.display(),
            "Enrichment run completed"
        );
        Ok(summary)
    }

    fn interrupt(
        &self,
        mut state: RunState,
        checkpoint_path: &std::path::Path,
        mut summary: RunSummary,
        next_batch: u64,
        stats_before: crate::request::StatsSnapshot,
        run_metrics: &RunMetrics,
    ) -> Result<RunSummary, EnrichError> {
        state.set_status(RunStatus::Interrupted, Some("shutdown requested".into()));
        state.save(checkpoint_path)?;
        fill_stats(&mut summary, self.executor.stats().since(&stats_before));
        summary.status = RunStatus::Interrupted;
        summary.next_batch = Some(next_batch);
        run_metrics.record_success(summary.succeeded + summary.failed);
        warn!(next_batch = next_batch, "Enrichment run interrupted");
        Ok(summary)
    }

    fn abort(
        &self,
        mut state: RunState,
        checkpoint_path: &std::path::Path,
        kind: FailureKind,
        message: String,
        next_batch: u64,
        run_metrics: &RunMetrics,
    ) -> EnrichError {
        state.set_status(RunStatus::Interrupted, Some(format!("{kind}: {message}")));
        if let Err(e) = state.save(checkpoint_path) {
            warn!(error = %e, "Failed to record aborted status");
        }
        run_metrics.record_failure(&message);
        EnrichError::Aborted {
            kind,
            message,
            next_batch,
        }
    }
}

async fn process_item<E: Enricher>(
    executor: &RequestExecutor,
    enricher: &E,
    item: &E::Item,
) -> ItemResult {
    let id = item.entity_id();
    match enricher.enrich(executor, item).await {
        Ok(fields) => ItemResult::Enriched(id, fields),
        Err(ItemError::Malformed(message)) => {
            warn!(entity_id = id, error = %message, "Payload missing expected fields");
            ItemResult::Failed(id, FailureKind::MalformedResponse, message)
        }
        Err(ItemError::Request(e)) if e.is_fatal() => ItemResult::Fatal(e.kind(), e.to_string()),
        Err(ItemError::Request(e)) => {
            debug!(entity_id = id, kind = %e.kind(), error = %e, "Item failed");
            ItemResult::Failed(id, e.kind(), e.to_string())
        }
    }
}

fn fill_stats(summary: &mut RunSummary, delta: crate::request::StatsSnapshot) {
    summary.cache_hits = delta.cache_hits;
    summary.network_calls = delta.network_calls;
}

/// SHA-256 over the ordered entity ids
fn population_digest<T: EnrichItem>(population: &[T]) -> String {
    let mut hasher = Sha256::new();
    for item in population {
        hasher.update(item.entity_id().to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}
