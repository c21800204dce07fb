//! Shared fixtures: a scripted transport and an in-memory entity store

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use github_ingest::cache::ResponseCache;
use github_ingest::credentials::{ApiToken, CredentialPool};
use github_ingest::enrich::{StatField, WorkItem};
use github_ingest::output::{EntityStore, OutputError, OutputResult};
use github_ingest::request::{
    ApiCall, ApiRequest, QuotaSnapshot, RawResponse, RequestExecutor, RetryPolicy, Transport,
    TransportError,
};
use github_ingest::FieldMap;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = dyn Fn(&ApiRequest, &str, usize) -> Result<RawResponse, TransportError> + Send + Sync;

/// One call seen by [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct SeenCall {
    pub token: String,
    pub request: ApiRequest,
}

/// Transport answering from a closure `(request, token, call_index)`
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<SeenCall>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest, &str, usize) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<SeenCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Repository ids requested through the stats query, in call order
    pub fn requested_ids(&self) -> Vec<u64> {
        self.calls().iter().filter_map(|c| repo_id(&c.request)).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest, token: &ApiToken) -> Result<RawResponse, TransportError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(SeenCall {
                token: token.expose().to_string(),
                request: request.clone(),
            });
            calls.len() - 1
        };
        (self.handler)(request, token.expose(), index)
    }
}

/// Executor with fast backoff and optional cache
pub fn executor(
    transport: Arc<ScriptedTransport>,
    tokens: &[&str],
    cache: Option<ResponseCache>,
) -> RequestExecutor {
    let pool = Arc::new(
        CredentialPool::new(tokens.iter().copied()).with_safety_margin(Duration::ZERO),
    );
    let mut executor = RequestExecutor::new(transport, pool).with_retry_policy(
        RetryPolicy::default()
            .with_max_retries(2)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5)),
    );
    if let Some(cache) = cache {
        executor = executor.with_cache(cache);
    }
    executor
}

pub fn ok_json(body: Value) -> Result<RawResponse, TransportError> {
    Ok(RawResponse::new(200, body.to_string()))
}

pub fn quota(remaining: u32, reset_in: chrono::Duration) -> QuotaSnapshot {
    QuotaSnapshot {
        limit: Some(5000),
        remaining,
        reset_at: Utc::now() + reset_in,
    }
}

/// `o/repo-<id>` work items missing the statistics one stats query answers
pub fn population(ids: impl IntoIterator<Item = u64>) -> Vec<WorkItem> {
    ids.into_iter()
        .map(|id| {
            WorkItem::new(id, "o", format!("repo-{id}")).with_missing([
                StatField::PullRequests,
                StatField::Commits,
                StatField::Issues,
                StatField::Releases,
            ])
        })
        .collect()
}

/// Id encoded in a stats query's `name` variable
pub fn repo_id(request: &ApiRequest) -> Option<u64> {
    match request.call() {
        ApiCall::GraphQl(call) => call.variables["name"]
            .as_str()?
            .strip_prefix("repo-")?
            .parse()
            .ok(),
        ApiCall::Rest(_) => None,
    }
}

/// GraphQL body for the stats query of repository `id`
pub fn stats_body(id: u64) -> Value {
    json!({
        "data": {
            "repository": {
                "id": format!("R_{id}"),
                "pullRequests": {"totalCount": id},
                "issues": {"totalCount": id * 2},
                "releases": {"totalCount": 1},
                "defaultBranchRef": {"target": {"history": {"totalCount": id * 10}}}
            }
        }
    })
}

/// GraphQL `NOT_FOUND` body
pub fn not_found_body() -> Value {
    json!({
        "data": {"repository": null},
        "errors": [{"type": "NOT_FOUND", "message": "Could not resolve to a Repository"}]
    })
}

/// Answers stats queries, failing permanently for ids in `failing`
pub fn stats_handler(
    failing: Vec<u64>,
) -> impl Fn(&ApiRequest, &str, usize) -> Result<RawResponse, TransportError> + Send + Sync {
    move |request, _, _| match repo_id(request) {
        Some(id) if failing.contains(&id) => ok_json(not_found_body()),
        Some(id) => ok_json(stats_body(id)),
        None => Ok(RawResponse::new(400, r#"{"message":"unexpected call"}"#)),
    }
}

/// Entity store kept in memory, optionally failing the n-th commit (0-based)
#[derive(Debug, Default)]
pub struct MemoryStore {
    staged: Vec<(u64, FieldMap)>,
    pub committed: BTreeMap<u64, FieldMap>,
    pub commits: usize,
    pub fail_commit_at: Option<usize>,
}

impl MemoryStore {
    pub fn failing_at(commit: usize) -> Self {
        Self {
            fail_commit_at: Some(commit),
            ..Default::default()
        }
    }
}

impl EntityStore for MemoryStore {
    fn upsert_derived_fields(&mut self, entity_id: u64, fields: &FieldMap) -> OutputResult<()> {
        self.staged.push((entity_id, fields.clone()));
        Ok(())
    }

    fn commit(&mut self) -> OutputResult<()> {
        if self.fail_commit_at == Some(self.commits) {
            self.staged.clear();
            return Err(OutputError::IoError("disk full".to_string()));
        }
        for (id, fields) in self.staged.drain(..) {
            self.committed.entry(id).or_default().extend(fields);
        }
        self.commits += 1;
        Ok(())
    }
}

/// Parse the `created:A..B` qualifier of a search query (both ends inclusive)
pub fn created_range(query: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let range = query.split("created:").nth(1)?.split_whitespace().next()?;
    let (from, to) = range.split_once("..")?;
    let parse = |s: &str| {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
            .ok()
            .map(|n| n.and_utc())
    };
    Some((parse(from)?, parse(to)?))
}

/// REST query parameter
pub fn param(request: &ApiRequest, name: &str) -> Option<String> {
    match request.call() {
        ApiCall::Rest(rest) => rest.params.get(name).cloned(),
        ApiCall::GraphQl(_) => None,
    }
}

/// Search API over an in-memory set of `(id, created_at)` repositories
pub fn search_handler(
    repos: Vec<(u64, DateTime<Utc>)>,
) -> impl Fn(&ApiRequest, &str, usize) -> Result<RawResponse, TransportError> + Send + Sync {
    move |request, _, _| {
        let query = param(request, "q").unwrap_or_default();
        let Some((from, to)) = created_range(&query) else {
            return Ok(RawResponse::new(422, r#"{"message":"bad query"}"#));
        };
        let per_page: usize = param(request, "per_page").and_then(|p| p.parse().ok()).unwrap_or(30);
        let page: usize = param(request, "page").and_then(|p| p.parse().ok()).unwrap_or(1);

        let mut matching: Vec<&(u64, DateTime<Utc>)> =
            repos.iter().filter(|(_, at)| *at >= from && *at <= to).collect();
        matching.sort_by_key(|(id, at)| (*at, *id));
        let items: Vec<Value> = matching
            .iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .map(|(id, at)| {
                json!({
                    "id": id,
                    "name": format!("repo-{id}"),
                    "full_name": format!("o/repo-{id}"),
                    "owner": {"login": "o"},
                    "created_at": at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    "stargazers_count": 0,
                    "forks_count": 0,
                    "language": null,
                    "html_url": format!("https://github.com/o/repo-{id}")
                })
            })
            .collect();
        ok_json(json!({"total_count": matching.len(), "incomplete_results": false, "items": items}))
    }
}
