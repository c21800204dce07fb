//! Integration tests for owner profiles and contributor counts

use super::support::{executor, MemoryStore, ScriptedTransport};
use github_ingest::enrich::{
    BatchEnrichmentEngine, OwnerDetailsEnricher, OwnerItem, OwnerKind, RepoStatsEnricher,
    RunOptions, StatField, WorkItem,
};
use github_ingest::request::{ApiCall, ApiRequest, RawResponse, TransportError};
use github_ingest::resume::{RunStatus, RunTarget};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn rest_path(request: &ApiRequest) -> String {
    match request.call() {
        ApiCall::Rest(rest) => rest.path.clone(),
        ApiCall::GraphQl(_) => String::new(),
    }
}

fn page(request: &ApiRequest) -> usize {
    match request.call() {
        ApiCall::Rest(rest) => rest.params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1),
        ApiCall::GraphQl(_) => 0,
    }
}

fn contributors(count: usize) -> Result<RawResponse, TransportError> {
    let listing: Vec<Value> = (0..count).map(|i| json!({"login": format!("dev-{i}")})).collect();
    Ok(RawResponse::new(200, Value::Array(listing).to_string()))
}

#[tokio::test]
async fn test_contributors_are_counted_across_pages() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "contributors").unwrap();
    let transport = ScriptedTransport::new(|request, _, _| {
        match (rest_path(request).as_str(), page(request)) {
            ("repos/o/busy/contributors", 1) => contributors(100),
            ("repos/o/busy/contributors", 2) => contributors(37),
            ("repos/o/empty/contributors", _) => Ok(RawResponse::new(204, "")),
            _ => Ok(RawResponse::new(400, r#"{"message":"unexpected call"}"#)),
        }
    });

    let items = vec![
        WorkItem::new(1, "o", "busy").with_missing([StatField::Contributors]),
        WorkItem::new(2, "o", "empty").with_missing([StatField::Contributors]),
    ];
    let mut engine = BatchEnrichmentEngine::new(
        Arc::new(executor(transport.clone(), &["t"], None)),
        RepoStatsEnricher::new(),
        MemoryStore::default(),
        target,
    );
    let summary = engine.run(items, &RunOptions::default()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(transport.call_count(), 3);
    let committed = &engine.store().committed;
    assert_eq!(committed[&1]["contributors_count"], json!(137));
    assert_eq!(committed[&2]["contributors_count"], json!(0));
}

#[tokio::test]
async fn test_owner_profiles_are_fetched_per_account_type() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "owners").unwrap();
    let transport = ScriptedTransport::new(|request, _, _| match rest_path(request).as_str() {
        "users/octocat" => Ok(RawResponse::new(
            200,
            json!({"login": "octocat", "id": 1, "type": "User", "location": "San Francisco", "bio": null})
                .to_string(),
        )),
        "orgs/rust-lang" => Ok(RawResponse::new(
            200,
            json!({"login": "rust-lang", "id": 2, "type": "Organization", "public_repos": 200})
                .to_string(),
        )),
        _ => Ok(RawResponse::new(404, r#"{"message":"Not Found"}"#)),
    });

    let owners = vec![
        OwnerItem::new(2, "rust-lang", OwnerKind::Organization),
        OwnerItem::new(1, "octocat", OwnerKind::User),
        OwnerItem::new(3, "ghost", OwnerKind::User),
        OwnerItem::new(1, "octocat", OwnerKind::User),
    ];
    let mut engine = BatchEnrichmentEngine::new(
        Arc::new(executor(transport.clone(), &["t"], None)),
        OwnerDetailsEnricher::new(),
        MemoryStore::default(),
        target,
    );
    let summary = engine.run(owners, &RunOptions::default()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.items_total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(transport.call_count(), 3);

    let committed = &engine.store().committed;
    assert_eq!(committed[&1]["location"], json!("San Francisco"));
    assert_eq!(committed[&1]["owner_kind"], json!("user"));
    assert!(!committed[&1].contains_key("bio"));
    assert_eq!(committed[&2]["public_repos"], json!(200));
    assert_eq!(committed[&2]["owner_kind"], json!("organization"));
    assert!(!committed.contains_key(&3));
}
