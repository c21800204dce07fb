//! Integration tests for rate-limit absorption, retries and cancellation

use super::support::{executor, ok_json, quota, ScriptedTransport};
use chrono::Duration as ChronoDuration;
use github_ingest::credentials::{CredentialId, CredentialPool, PoolError};
use github_ingest::request::{
    ApiRequest, FailureKind, RawResponse, RequestError, RequestExecutor, TransportError,
};
use github_ingest::shutdown::ShutdownCoordinator;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_rate_limit_is_absorbed_by_rotating_credentials() {
    let transport = ScriptedTransport::new(|_, token, _| {
        if token == "first" {
            Ok(RawResponse::new(403, r#"{"message":"API rate limit exceeded"}"#)
                .with_quota(quota(0, ChronoDuration::hours(1))))
        } else {
            Ok(RawResponse::new(200, json!({"ok": true}).to_string())
                .with_quota(quota(4321, ChronoDuration::minutes(30))))
        }
    });
    let executor = executor(transport.clone(), &["first", "second"], None);

    let response = executor.execute(&ApiRequest::get("repos/a/b")).await.unwrap();
    assert_eq!(response.payload["ok"], true);

    let tokens: Vec<String> = transport.calls().into_iter().map(|c| c.token).collect();
    assert_eq!(tokens, vec!["first", "second"]);

    let stats = executor.stats();
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.retries, 0);

    // Both responses fed the pool: the first credential is drained, the
    // second carries the quota from the successful call.
    let credentials = executor.pool().snapshot();
    assert_eq!(credentials[0].remaining(), Some(0));
    assert_eq!(credentials[1].remaining(), Some(4321));
    assert!(credentials[1].reset_at().is_some());

    // The parked credential is not chosen again before its reset.
    executor.execute(&ApiRequest::get("repos/c/d")).await.unwrap();
    assert_eq!(transport.calls().last().unwrap().token, "second");
}

#[tokio::test]
async fn test_rate_limits_do_not_spend_the_retry_budget() {
    let transport = ScriptedTransport::new(|_, _, index| {
        if index < 4 {
            Ok(RawResponse::new(429, "slow down").with_retry_after(Duration::from_millis(1)))
        } else {
            ok_json(json!({"ok": true}))
        }
    });
    let executor = executor(transport.clone(), &["only"], None);

    let response = executor.execute(&ApiRequest::get("repos/a/b")).await.unwrap();
    assert_eq!(response.payload["ok"], true);
    assert_eq!(transport.call_count(), 5);
    assert_eq!(executor.stats().retries, 0);
}

#[tokio::test]
async fn test_pool_waits_for_the_earliest_reset() {
    let transport = ScriptedTransport::new(|_, _, _| ok_json(json!({"ok": true})));
    let pool = Arc::new(CredentialPool::new(vec!["a", "b"]).with_safety_margin(Duration::ZERO));
    let soon = chrono::Utc::now() + ChronoDuration::milliseconds(200);
    pool.record_usage(&CredentialId::new("token-0"), 0, soon);
    pool.record_usage(
        &CredentialId::new("token-1"),
        0,
        chrono::Utc::now() + ChronoDuration::hours(1),
    );
    let executor = RequestExecutor::new(transport.clone(), pool);

    let started = Instant::now();
    executor.execute(&ApiRequest::get("repos/a/b")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(transport.calls()[0].token, "a");
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let transport = ScriptedTransport::new(|_, _, index| match index {
        0 => Ok(RawResponse::new(502, "bad gateway")),
        1 => Err(TransportError::Timeout("30s".to_string())),
        _ => ok_json(json!({"ok": true})),
    });
    let executor = executor(transport.clone(), &["t"], None);

    executor.execute(&ApiRequest::get("repos/a/b")).await.unwrap();
    assert_eq!(transport.call_count(), 3);
    assert_eq!(executor.stats().retries, 2);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_is_transient_failure() {
    let transport = ScriptedTransport::new(|_, _, _| Ok(RawResponse::new(500, "boom")));
    let executor = executor(transport.clone(), &["t"], None);

    let err = executor.execute(&ApiRequest::get("repos/a/b")).await.unwrap_err();
    assert!(matches!(err, RequestError::Transient { attempts: 3, .. }));
    assert_eq!(err.kind(), FailureKind::TransientServerError);
    assert!(!err.is_fatal());
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn test_permanent_client_error_is_not_retried() {
    let transport = ScriptedTransport::new(|_, _, _| {
        Ok(RawResponse::new(422, r#"{"message":"Validation Failed"}"#))
    });
    let executor = executor(transport.clone(), &["t"], None);

    let err = executor.execute(&ApiRequest::get("search/repositories")).await.unwrap_err();
    match err {
        RequestError::PermanentClient { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, "Validation Failed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_empty_pool_is_fatal() {
    let transport = ScriptedTransport::new(|_, _, _| ok_json(json!({})));
    let executor = executor(transport.clone(), &[], None);

    let err = executor.execute(&ApiRequest::get("repos/a/b")).await.unwrap_err();
    assert_eq!(err, RequestError::Credentials(PoolError::NoCredentialsConfigured));
    assert!(err.is_fatal());
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_a_quota_wait() {
    let transport = ScriptedTransport::new(|_, _, _| ok_json(json!({})));
    let pool = Arc::new(CredentialPool::new(vec!["a"]));
    pool.record_usage(
        &CredentialId::new("token-0"),
        0,
        chrono::Utc::now() + ChronoDuration::hours(1),
    );
    let shutdown = ShutdownCoordinator::shared();
    let executor = RequestExecutor::new(transport.clone(), pool).with_shutdown(shutdown.clone());

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.request_shutdown();
    });

    let err = executor.execute(&ApiRequest::get("repos/a/b")).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Cancelled);
    assert_eq!(transport.call_count(), 0);
}
