//! Integration tests for checkpointed batch enrichment

use super::support::{executor, population, stats_handler, MemoryStore, ScriptedTransport};
use github_ingest::enrich::{BatchEnrichmentEngine, EnrichError, RepoStatsEnricher, RunOptions};
use github_ingest::request::FailureKind;
use github_ingest::resume::{
    CheckpointType, FailureLedger, ResumeError, RunLock, RunState, RunStatus, RunTarget,
};
use github_ingest::shutdown::ShutdownCoordinator;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

fn options(batch_size: usize) -> RunOptions {
    RunOptions {
        batch_size,
        ..Default::default()
    }
}

fn engine(
    transport: Arc<ScriptedTransport>,
    store: MemoryStore,
    target: &RunTarget,
) -> BatchEnrichmentEngine<RepoStatsEnricher, MemoryStore> {
    BatchEnrichmentEngine::new(
        Arc::new(executor(transport, &["t"], None)),
        RepoStatsEnricher::new(),
        store,
        target.clone(),
    )
}

fn sorted(ids: Vec<u64>) -> Vec<u64> {
    let mut ids = ids;
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_resume_continues_after_last_committed_batch() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();

    // Batches: [1,2,3] [4,5,6] [7,8,9] [10]; the third commit fails.
    let first = ScriptedTransport::new(stats_handler(vec![]));
    let mut failing = engine(first, MemoryStore::failing_at(2), &target);
    let err = failing.run(population(1..=10), &options(3)).await.unwrap_err();
    match err {
        EnrichError::Aborted { kind, next_batch, .. } => {
            assert_eq!(kind, FailureKind::StorageUnavailable);
            assert_eq!(next_batch, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        failing.store().committed.keys().copied().collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5, 6]
    );

    let state = RunState::load(&target.checkpoint_path()).unwrap();
    assert_eq!(state.status(), RunStatus::Interrupted);
    assert!(state.metadata().last_error().is_some());
    assert_eq!(state.checkpoint().unwrap().last_completed_batch(), Some(1));

    let second = ScriptedTransport::new(stats_handler(vec![]));
    let mut resumed = engine(second.clone(), MemoryStore::default(), &target);
    let summary = resumed.run(population(1..=10), &options(3)).await.unwrap();

    assert_eq!(sorted(second.requested_ids()), vec![7, 8, 9, 10]);
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.batches_skipped, 2);
    assert_eq!(summary.skipped, 6);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(
        resumed.store().committed.keys().copied().collect::<Vec<_>>(),
        vec![7, 8, 9, 10]
    );
}

#[tokio::test]
async fn test_item_failures_do_not_fail_the_batch() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();
    let transport = ScriptedTransport::new(stats_handler(vec![2, 5]));
    let mut engine = engine(transport, MemoryStore::default(), &target);

    let summary = engine.run(population(1..=6), &options(3)).await.unwrap();
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.batches_processed, 2);

    let store = engine.store();
    assert_eq!(store.committed.len(), 4);
    assert_eq!(store.committed[&4]["pull_requests"], json!(4));
    assert_eq!(store.committed[&4]["commits"], json!(40));

    let records = FailureLedger::new(target.ledger_path()).read_records().unwrap();
    let failed: Vec<u64> = records.iter().map(|r| r.entity_id).collect();
    assert_eq!(failed, vec![2, 5]);
    assert!(records
        .iter()
        .all(|r| r.kind == FailureKind::PermanentClientError));
    assert_eq!(records[1].batch_index, 1);
}

#[tokio::test]
async fn test_retry_failed_only_touches_ledger_ids() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();

    let first = ScriptedTransport::new(stats_handler(vec![7, 42]));
    let summary = engine(first, MemoryStore::default(), &target)
        .run(population(1..=50), &options(10))
        .await
        .unwrap();
    assert_eq!(summary.failed, 2);

    let second = ScriptedTransport::new(stats_handler(vec![]));
    let mut retry = engine(second.clone(), MemoryStore::default(), &target);
    let retry_options = RunOptions {
        only_failed: true,
        ..options(10)
    };
    let summary = retry.run(population(1..=50), &retry_options).await.unwrap();

    assert_eq!(sorted(second.requested_ids()), vec![7, 42]);
    assert_eq!(summary.target, "stats.retry");
    assert_eq!(summary.items_total, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(
        retry.store().committed.keys().copied().collect::<BTreeSet<_>>(),
        BTreeSet::from([7, 42])
    );

    // The main target's ledger is left for inspection.
    let original = FailureLedger::new(target.ledger_path()).failed_ids().unwrap();
    assert_eq!(original, BTreeSet::from([7, 42]));
}

#[tokio::test]
async fn test_repeated_retry_processes_ledger_ids_again() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();

    let first = ScriptedTransport::new(stats_handler(vec![7, 42]));
    engine(first, MemoryStore::default(), &target)
        .run(population(1..=50), &options(10))
        .await
        .unwrap();

    let retry_options = RunOptions {
        only_failed: true,
        ..options(10)
    };
    for _ in 0..2 {
        let transport = ScriptedTransport::new(stats_handler(vec![]));
        let mut retry = engine(transport.clone(), MemoryStore::default(), &target);
        let summary = retry.run(population(1..=50), &retry_options).await.unwrap();

        assert_eq!(sorted(transport.requested_ids()), vec![7, 42]);
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.batches_skipped, 0);
    }
}

#[tokio::test]
async fn test_repeated_dry_run_does_the_work_again() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();
    let dry = RunOptions {
        dry_run: true,
        ..options(2)
    };
    for _ in 0..2 {
        let transport = ScriptedTransport::new(stats_handler(vec![]));
        let summary = engine(transport.clone(), MemoryStore::default(), &target)
            .run(population(1..=4), &dry)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 4);
        assert_eq!(summary.succeeded, 4);
    }
}

#[tokio::test]
async fn test_dry_run_leaves_store_and_checkpoint_alone() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();
    let transport = ScriptedTransport::new(stats_handler(vec![3]));
    let mut engine = engine(transport.clone(), MemoryStore::default(), &target);

    let dry = RunOptions {
        dry_run: true,
        ..options(2)
    };
    let summary = engine.run(population(1..=4), &dry).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.target, "stats.dry-run");
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(transport.call_count(), 4);
    assert_eq!(engine.store().commits, 0);
    assert!(engine.store().committed.is_empty());
    assert!(!target.checkpoint_path().exists());
}

#[tokio::test]
async fn test_changed_batch_size_is_rejected_on_resume() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();

    let transport = ScriptedTransport::new(stats_handler(vec![]));
    engine(transport.clone(), MemoryStore::default(), &target)
        .run(population(1..=6), &options(3))
        .await
        .unwrap();

    let err = engine(transport.clone(), MemoryStore::default(), &target)
        .run(population(1..=6), &options(4))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrichError::CheckpointMismatch(_)));

    let err = engine(transport.clone(), MemoryStore::default(), &target)
        .run(population(1..=7), &options(3))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrichError::CheckpointMismatch(_)));

    // A fresh run discards the checkpoint instead.
    let fresh = RunOptions {
        resume_from_checkpoint: false,
        ..options(4)
    };
    let summary = engine(transport, MemoryStore::default(), &target)
        .run(population(1..=6), &fresh)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 6);
    let state = RunState::load(&target.checkpoint_path()).unwrap();
    match state.checkpoint().unwrap().checkpoint_type() {
        CheckpointType::Batch { batch_size, .. } => assert_eq!(*batch_size, 4),
        other => panic!("unexpected checkpoint: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_credentials_abort_before_any_batch() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();
    let transport = ScriptedTransport::new(stats_handler(vec![]));
    let mut engine = BatchEnrichmentEngine::new(
        Arc::new(executor(transport.clone(), &[], None)),
        RepoStatsEnricher::new(),
        MemoryStore::default(),
        target.clone(),
    );

    let err = engine.run(population(1..=4), &options(2)).await.unwrap_err();
    match err {
        EnrichError::Aborted { kind, next_batch, .. } => {
            assert_eq!(kind, FailureKind::NoCredentialsConfigured);
            assert_eq!(next_batch, 0);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(transport.call_count(), 0);
    assert_eq!(engine.store().commits, 0);
    // Nothing fatal belongs in the failure ledger.
    assert!(FailureLedger::new(target.ledger_path()).failed_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_at_batch_boundary() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();
    let transport = ScriptedTransport::new(stats_handler(vec![]));
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let executor = executor(transport.clone(), &["t"], None).with_shutdown(shutdown);
    let mut engine = BatchEnrichmentEngine::new(
        Arc::new(executor),
        RepoStatsEnricher::new(),
        MemoryStore::default(),
        target.clone(),
    );

    let summary = engine.run(population(1..=4), &options(2)).await.unwrap();
    assert_eq!(summary.status, RunStatus::Interrupted);
    assert_eq!(summary.next_batch, Some(0));
    assert_eq!(transport.call_count(), 0);

    let state = RunState::load(&target.checkpoint_path()).unwrap();
    assert_eq!(state.status(), RunStatus::Interrupted);
}

#[tokio::test]
async fn test_busy_target_is_refused() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();
    let _held = RunLock::try_acquire(&target.lock_path(), target.name()).unwrap();

    let transport = ScriptedTransport::new(stats_handler(vec![]));
    let err = engine(transport.clone(), MemoryStore::default(), &target)
        .run(population(1..=2), &options(2))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrichError::Resume(ResumeError::TargetBusy(_))));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_zero_batch_size_is_invalid() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "stats").unwrap();
    let transport = ScriptedTransport::new(stats_handler(vec![]));
    let err = engine(transport, MemoryStore::default(), &target)
        .run(population(1..=2), &options(0))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrichError::InvalidOptions(_)));
}
