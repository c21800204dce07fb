//! Integration tests for period sweeps against a scripted search API

use super::support::{executor, search_handler, ScriptedTransport};
use chrono::{DateTime, Duration, TimeZone, Utc};
use github_ingest::collect::{CollectError, CollectionTracker, SweepRequest};
use github_ingest::output::{OutputError, OutputResult, RepositorySink};
use github_ingest::request::FailureKind;
use github_ingest::resume::{RunState, RunStatus, RunTarget};
use github_ingest::RepositoryRecord;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

/// Sink that keeps committed records in memory
#[derive(Debug, Default)]
struct VecSink {
    staged: Vec<RepositoryRecord>,
    committed: Vec<RepositoryRecord>,
    commits: usize,
    fail_commit_at: Option<usize>,
}

impl VecSink {
    fn ids(&self) -> Vec<u64> {
        self.committed.iter().map(|r| r.id).collect()
    }
}

impl RepositorySink for VecSink {
    fn write_repository(&mut self, record: &RepositoryRecord) -> OutputResult<()> {
        self.staged.push(record.clone());
        Ok(())
    }

    fn commit(&mut self) -> OutputResult<()> {
        if self.fail_commit_at == Some(self.commits) {
            self.staged.clear();
            return Err(OutputError::IoError("disk full".to_string()));
        }
        self.committed.append(&mut self.staged);
        self.commits += 1;
        Ok(())
    }
}

fn day() -> SweepRequest {
    SweepRequest {
        start: Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).single().unwrap(),
        end: Utc.with_ymd_and_hms(2021, 3, 2, 0, 0, 0).single().unwrap(),
        qualifiers: "language:rust".to_string(),
    }
}

/// 20 repositories spread over the day plus 40 packed into one hour
fn clustered_repos(start: DateTime<Utc>) -> Vec<(u64, DateTime<Utc>)> {
    let spread = (0..20).map(|i| (i + 1, start + Duration::minutes(72 * i as i64 + 5)));
    let burst = (0..40).map(|i| (100 + i, start + Duration::hours(13) + Duration::seconds(90 * i as i64)));
    spread.chain(burst).collect()
}

fn tracker(transport: Arc<ScriptedTransport>, target: &RunTarget) -> CollectionTracker {
    CollectionTracker::new(Arc::new(executor(transport, &["t"], None)), target.clone())
        .with_cap(10)
        .with_per_page(5)
}

#[tokio::test]
async fn test_sweep_collects_every_repository_once() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "collect").unwrap();
    let request = day();
    let repos = clustered_repos(request.start);
    let transport = ScriptedTransport::new(search_handler(repos.clone()));
    let mut sink = VecSink::default();

    let summary = tracker(transport, &target)
        .sweep(&request, &mut sink, true)
        .await
        .unwrap();

    let mut ids = sink.ids();
    ids.sort_unstable();
    let expected: Vec<u64> = repos.iter().map(|(id, _)| *id).collect::<BTreeSet<_>>().into_iter().collect();
    assert_eq!(ids, expected);
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.estimated_total, 60);
    assert_eq!(summary.collected, 60);
    assert!(summary.periods_subdivided > 0);
    assert_eq!(summary.periods_pending, 0);
}

#[tokio::test]
async fn test_search_queries_carry_qualifiers_and_disjoint_ranges() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "collect").unwrap();
    let request = day();
    let transport = ScriptedTransport::new(search_handler(clustered_repos(request.start)));
    let mut sink = VecSink::default();

    tracker(transport.clone(), &target)
        .sweep(&request, &mut sink, false)
        .await
        .unwrap();

    for call in transport.calls() {
        let query = super::support::param(&call.request, "q").unwrap();
        assert!(query.starts_with("language:rust created:"), "{query}");
    }
}

#[tokio::test]
async fn test_period_too_dense_to_split_fails() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "collect").unwrap();
    let request = SweepRequest {
        start: Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).single().unwrap(),
        end: Utc.with_ymd_and_hms(2021, 3, 1, 1, 0, 0).single().unwrap(),
        qualifiers: String::new(),
    };
    let same_second = request.start + Duration::minutes(30);
    let repos = (1..=12).map(|id| (id, same_second)).collect();
    let transport = ScriptedTransport::new(search_handler(repos));
    let mut sink = VecSink::default();

    let err = tracker(transport, &target)
        .sweep(&request, &mut sink, true)
        .await
        .unwrap_err();
    match err {
        CollectError::PeriodTooDense { period, total } => {
            assert_eq!(total, 12);
            assert!(period.is_atomic());
            assert_eq!(period.start, same_second);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let state = RunState::load(&target.checkpoint_path()).unwrap();
    assert_eq!(state.status(), RunStatus::Interrupted);
}

#[tokio::test]
async fn test_sweep_resumes_at_first_pending_period() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "collect").unwrap();
    let request = day();
    let repos = clustered_repos(request.start);

    let first = ScriptedTransport::new(search_handler(repos.clone()));
    let mut broken = VecSink {
        fail_commit_at: Some(2),
        ..Default::default()
    };
    let err = tracker(first, &target)
        .sweep(&request, &mut broken, true)
        .await
        .unwrap_err();
    match err {
        CollectError::Aborted { kind, next_period, .. } => {
            assert_eq!(kind, FailureKind::StorageUnavailable);
            assert!(next_period.is_some());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(broken.commits, 2);

    let second = ScriptedTransport::new(search_handler(repos.clone()));
    let mut sink = VecSink::default();
    let summary = tracker(second.clone(), &target)
        .sweep(&request, &mut sink, true)
        .await
        .unwrap();

    // No fresh estimate on resume: the first query already targets a sub-period.
    let first_query = super::support::param(&second.calls()[0].request, "per_page").unwrap();
    assert_eq!(first_query, "5");

    let mut all: Vec<u64> = broken.ids();
    all.extend(sink.ids());
    let distinct: BTreeSet<u64> = all.iter().copied().collect();
    assert_eq!(all.len(), repos.len());
    assert_eq!(distinct.len(), repos.len());
    assert_eq!(summary.collected_total, repos.len() as u64);
}

#[tokio::test]
async fn test_resume_with_other_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "collect").unwrap();
    let request = day();
    let transport = ScriptedTransport::new(search_handler(clustered_repos(request.start)));

    tracker(transport.clone(), &target)
        .sweep(&request, &mut VecSink::default(), true)
        .await
        .unwrap();

    let shifted = SweepRequest {
        end: request.end + Duration::days(1),
        ..request.clone()
    };
    let err = tracker(transport, &target)
        .sweep(&shifted, &mut VecSink::default(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::CheckpointMismatch(_)));
}

#[tokio::test]
async fn test_resume_with_other_qualifiers_is_rejected() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "collect").unwrap();
    let request = day();
    let rust = ScriptedTransport::new(search_handler(clustered_repos(request.start)));

    let summary = tracker(rust, &target)
        .sweep(&request, &mut VecSink::default(), true)
        .await
        .unwrap();
    assert_eq!(summary.collected, 60);

    let go = SweepRequest {
        qualifiers: "language:go".to_string(),
        ..request.clone()
    };
    let transport = ScriptedTransport::new(search_handler(clustered_repos(request.start)));
    let err = tracker(transport.clone(), &target)
        .sweep(&go, &mut VecSink::default(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::CheckpointMismatch(_)));
    assert_eq!(transport.call_count(), 0);

    // Without resume the new qualifiers are swept from scratch.
    let mut sink = VecSink::default();
    let summary = tracker(transport.clone(), &target)
        .sweep(&go, &mut sink, false)
        .await
        .unwrap();
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(sink.ids().len(), 60);
    for call in transport.calls() {
        let query = super::support::param(&call.request, "q").unwrap();
        assert!(query.starts_with("language:go created:"), "{query}");
    }
}

#[tokio::test]
async fn test_empty_range_is_invalid() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "collect").unwrap();
    let request = day();
    let backwards = SweepRequest {
        start: request.end,
        end: request.start,
        qualifiers: String::new(),
    };
    let transport = ScriptedTransport::new(search_handler(vec![]));
    let err = tracker(transport.clone(), &target)
        .sweep(&backwards, &mut VecSink::default(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::InvalidSweep(_)));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_sub_second_bounds_are_invalid() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "collect").unwrap();
    let request = SweepRequest {
        start: day().start + Duration::milliseconds(500),
        ..day()
    };
    let transport = ScriptedTransport::new(search_handler(vec![]));
    let err = tracker(transport.clone(), &target)
        .sweep(&request, &mut VecSink::default(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::InvalidSweep(_)));
    assert_eq!(transport.call_count(), 0);
}
