//! # GitHub Ingest Library
//!
//! A resilient ingestion engine for GitHub repository metadata. Built to
//! sustain millions of API calls against a shared, multi-tenant rate limit,
//! survive partial failures inside large batches, and resume after arbitrary
//! interruption without redoing completed work.
//!
//! ## Features
//!
//! - **Credential Pool**: every call uses the token with the most remaining quota
//! - **Request Executor**: rate limits are absorbed, transient failures retried with backoff
//! - **Response Cache**: deterministic keys, TTLs, negative caching, safe across processes
//! - **Batch Enrichment**: per-item failure isolation, failure ledger, checkpointed batches
//! - **Collection Sweeps**: adaptive date-range partitioning under the search result cap
//! - **Geocoding Cache**: normalised free-text locations resolved once
//!
//! ## Quick Start
//!
//! ```no_run
//! use github_ingest::credentials::CredentialPool;
//! use github_ingest::request::{ApiRequest, GitHubTransport, RequestExecutor};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Arc::new(CredentialPool::new(vec!["ghp_first", "ghp_second"]));
//! let executor = RequestExecutor::new(Arc::new(GitHubTransport::new()?), pool);
//!
//! let response = executor
//!     .execute(&ApiRequest::get("repos/rust-lang/rust"))
//!     .await?;
//! println!("{}", response.payload["stargazers_count"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`credentials`] - Credential pool and quota bookkeeping
//! - [`cache`] - Durable response cache
//! - [`request`] - Request executor, transport seam and response classification
//! - [`enrich`] - Batch enrichment engine
//! - [`collect`] - Period planning and checkpointed search sweeps
//! - [`geocoding`] - Location normalisation and cached geocoding
//! - [`resume`] - Checkpoints, run locks and the failure ledger
//! - [`output`] - Entity store, repository sink and population source
//! - [`shutdown`] - Cooperative cancellation

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Durable response cache
pub mod cache;

/// CLI command implementations
pub mod cli;

/// Collection strategy and progress tracking
pub mod collect;

/// Credential pool
pub mod credentials;

/// Batch enrichment engine
pub mod enrich;

/// Geocoding cache
pub mod geocoding;

/// Metrics and observability
pub mod metrics;

/// Output sinks and population source
pub mod output;

/// Progress reporting for runs and sweeps
pub mod progress;

/// Request execution
pub mod request;

/// Resume capability
pub mod resume;

/// Graceful shutdown coordination
pub mod shutdown;

/// Derived fields keyed by name, as attached to an entity
pub type FieldMap = BTreeMap<String, Value>;

/// Repository as returned by the search API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryRecord {
    /// GitHub database id
    pub id: u64,
    /// `owner/name`
    pub full_name: String,
    /// Owner login
    pub owner: String,
    /// Owner account id
    pub owner_id: Option<u64>,
    /// Owner account type, `User` or `Organization`
    pub owner_type: Option<String>,
    /// Repository name
    pub name: String,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Star count
    pub stargazers_count: u64,
    /// Fork count
    pub forks_count: u64,
    /// Primary language
    pub language: Option<String>,
    /// Web URL
    pub html_url: String,
}

impl RepositoryRecord {
    /// Parse one item of a `search/repositories` response.
    ///
    /// Returns `None` when a required field is missing.
    pub fn from_search_item(item: &Value) -> Option<Self> {
        let created_at = item
            .get("created_at")?
            .as_str()?
            .parse::<DateTime<Utc>>()
            .ok()?;
        let owner = item.get("owner")?;
        Some(Self {
            id: item.get("id")?.as_u64()?,
            full_name: item.get("full_name")?.as_str()?.to_string(),
            owner: owner.get("login")?.as_str()?.to_string(),
            owner_id: owner.get("id").and_then(Value::as_u64),
            owner_type: owner.get("type").and_then(Value::as_str).map(str::to_string),
            name: item.get("name")?.as_str()?.to_string(),
            created_at,
            stargazers_count: item
                .get("stargazers_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            forks_count: item.get("forks_count").and_then(Value::as_u64).unwrap_or(0),
            language: item
                .get("language")
                .and_then(Value::as_str)
                .map(str::to_string),
            html_url: item
                .get("html_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}
