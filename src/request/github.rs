//! reqwest transport for the GitHub REST and GraphQL APIs

use super::call::{ApiCall, ApiRequest, HttpMethod};
use super::config::REQUEST_TIMEOUT;
use super::transport::{QuotaSnapshot, RawResponse, Transport, TransportError};
use crate::credentials::ApiToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Public GitHub API root
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Transport issuing real HTTPS calls to GitHub
#[derive(Debug, Clone)]
pub struct GitHubTransport {
    client: Client,
    base_url: String,
}

impl GitHubTransport {
    /// Create a transport for the public API
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("github-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, GITHUB_API_URL))
    }

    /// Create a transport over an existing client and API root
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// API root in use
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for GitHubTransport {
    async fn send(&self, request: &ApiRequest, token: &ApiToken) -> Result<RawResponse, TransportError> {
        let builder = match request.call() {
            ApiCall::Rest(rest) => {
                let url = format!("{}/{}", self.base_url, rest.path);
                match rest.method {
                    HttpMethod::Get => self.client.get(url).query(&rest.params),
                    HttpMethod::Post => self.client.post(url).json(&rest.params),
                }
            }
            ApiCall::GraphQl(gql) => self
                .client
                .post(format!("{}/graphql", self.base_url))
                .json(&json!({ "query": gql.document, "variables": gql.variables })),
        };

        let response = builder
            .bearer_auth(token.expose())
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let quota = parse_quota(response.headers());
        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        debug!(
            endpoint = %request.endpoint(),
            status = status,
            remaining = ?quota.map(|q| q.remaining),
            bytes = body.len(),
            "Received response"
        );

        Ok(RawResponse {
            status,
            body,
            quota,
            retry_after,
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    let raw = headers.get(name)?.to_str().ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(header = name, value = raw, error = %e, "Ignoring unparsable header");
            None
        }
    }
}

/// Parse `x-ratelimit-*` headers. Remaining and reset are both required.
pub fn parse_quota(headers: &HeaderMap) -> Option<QuotaSnapshot> {
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset = header_u64(headers, "x-ratelimit-reset")?;
    let reset_at = DateTime::<Utc>::from_timestamp(i64::try_from(reset).ok()?, 0)?;
    Some(QuotaSnapshot {
        limit: header_u64(headers, "x-ratelimit-limit").and_then(|l| u32::try_from(l).ok()),
        remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        reset_at,
    })
}

/// Parse `retry-after` given in seconds
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, "retry-after").map(Duration::from_secs)
}
