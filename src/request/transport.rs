//! Transport seam between the executor and the network

use super::call::ApiRequest;
use crate::credentials::ApiToken;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Quota metadata reported with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Window size, when reported
    pub limit: Option<u32>,
    /// Calls left in the current window
    pub remaining: u32,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
}

/// Unclassified response as received from the server
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Bytes,
    /// Quota metadata parsed from the headers
    pub quota: Option<QuotaSnapshot>,
    /// `retry-after` hint
    pub retry_after: Option<Duration>,
}

impl RawResponse {
    /// Response with a body and no quota metadata
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            quota: None,
            retry_after: None,
        }
    }

    /// Attach quota metadata
    pub fn with_quota(mut self, quota: QuotaSnapshot) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Attach a `retry-after` hint
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Network-level failures. All of them are transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The call timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other network failure
    #[error("network error: {0}")]
    Network(String),
}

/// Sends one request with one token. Implementations never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue `request` authenticated with `token`
    async fn send(&self, request: &ApiRequest, token: &ApiToken) -> Result<RawResponse, TransportError>;
}
