//! Integration tests for cache keys and cache-aware execution

use super::support::{executor, ok_json, ScriptedTransport};
use github_ingest::cache::{CacheKey, ResponseCache};
use github_ingest::request::{ApiRequest, CachePolicy, RawResponse, RequestError};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_cache_key_ignores_parameter_order() {
    let forward = ApiRequest::get("search/repositories")
        .param("q", "language:rust")
        .param("per_page", 100)
        .param("page", 2);
    let backward = ApiRequest::get("search/repositories")
        .param("page", 2)
        .param("per_page", 100)
        .param("q", "language:rust");
    assert_eq!(forward.cache_key(), backward.cache_key());

    let other_page = ApiRequest::get("search/repositories")
        .param("q", "language:rust")
        .param("per_page", 100)
        .param("page", 3);
    assert_ne!(forward.cache_key(), other_page.cache_key());
}

#[test]
fn test_cache_key_separates_endpoints() {
    let params = BTreeMap::from([("q".to_string(), "x".to_string())]);
    let search = CacheKey::derive("search/repositories", &params);
    let users = CacheKey::derive("search/users", &params);
    assert_ne!(search, users);
    assert_eq!(search, CacheKey::derive("search/repositories", &params));
    assert_eq!(search.as_str().len(), 64);
}

#[test]
fn test_cache_key_ignores_graphql_whitespace() {
    let compact = ApiRequest::graphql("query { viewer { login } }", json!({"a": 1, "b": 2}));
    let spread = ApiRequest::graphql(
        "query {\n    viewer {\n        login\n    }\n}",
        json!({"b": 2, "a": 1}),
    );
    assert_eq!(compact.cache_key(), spread.cache_key());
}

#[tokio::test]
async fn test_repeated_request_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new(|_, _, _| ok_json(json!({"full_name": "rust-lang/rust"})));
    let executor = executor(
        transport.clone(),
        &["token-a"],
        Some(ResponseCache::open(dir.path()).unwrap()),
    );
    let request = ApiRequest::get("repos/rust-lang/rust");

    let first = executor.execute(&request).await.unwrap();
    let second = executor.execute(&request).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.payload, second.payload);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(executor.stats().cache_hits, 1);
}

#[tokio::test]
async fn test_cache_survives_a_new_executor() {
    let dir = TempDir::new().unwrap();
    let request = ApiRequest::get("repos/tokio-rs/tokio");

    let warm = ScriptedTransport::new(|_, _, _| ok_json(json!({"id": 1})));
    executor(warm, &["t"], Some(ResponseCache::open(dir.path()).unwrap()))
        .execute(&request)
        .await
        .unwrap();

    let cold = ScriptedTransport::new(|_, _, _| ok_json(json!({"id": 2})));
    let response = executor(cold.clone(), &["t"], Some(ResponseCache::open(dir.path()).unwrap()))
        .execute(&request)
        .await
        .unwrap();
    assert_eq!(response.payload["id"], 1);
    assert_eq!(cold.call_count(), 0);
}

#[tokio::test]
async fn test_negative_results_cached_only_when_enabled() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new(|_, _, _| {
        Ok(RawResponse::new(404, r#"{"message":"Not Found"}"#))
    });
    let executor = executor(
        transport.clone(),
        &["t"],
        Some(ResponseCache::open(dir.path()).unwrap()),
    );

    let plain = ApiRequest::get("repos/gone/one");
    for _ in 0..2 {
        assert!(matches!(
            executor.execute(&plain).await,
            Err(RequestError::PermanentClient { status: 404, .. })
        ));
    }
    assert_eq!(transport.call_count(), 2);

    let negative = ApiRequest::get("repos/gone/two").with_cache_policy(CachePolicy::ReadWrite {
        ttl: Duration::from_secs(60),
        negative_ttl: Some(Duration::from_secs(60)),
    });
    for _ in 0..2 {
        assert!(matches!(
            executor.execute(&negative).await,
            Err(RequestError::PermanentClient { status: 404, .. })
        ));
    }
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn test_bypass_and_refresh_policies() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new(|_, _, index| ok_json(json!({"call": index})));
    let executor = executor(
        transport.clone(),
        &["t"],
        Some(ResponseCache::open(dir.path()).unwrap()),
    );

    let bypass = ApiRequest::get("rate_limit").with_cache_policy(CachePolicy::Bypass);
    executor.execute(&bypass).await.unwrap();
    executor.execute(&bypass).await.unwrap();
    assert_eq!(transport.call_count(), 2);

    let cached = ApiRequest::get("repos/a/b");
    executor.execute(&cached).await.unwrap();
    let refreshed = cached.clone().with_cache_policy(CachePolicy::Refresh {
        ttl: Duration::from_secs(60),
    });
    let fresh = executor.execute(&refreshed).await.unwrap();
    assert!(!fresh.from_cache);

    let reread = executor.execute(&cached).await.unwrap();
    assert!(reread.from_cache);
    assert_eq!(reread.payload, fresh.payload);
}
