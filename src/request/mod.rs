//! Request execution against the GitHub API
//!
//! Every outbound call goes through [`RequestExecutor::execute`], which
//! consults the response cache, picks a credential from the pool, sends the
//! call through a [`Transport`], records the quota the server reports, and
//! classifies the outcome. Rate limits are absorbed (the credential is parked
//! until its reset and another one is tried); transient failures retry with
//! exponential backoff; permanent failures surface with their classification.

pub mod call;
pub mod config;
pub mod executor;
pub mod github;
pub mod outcome;
pub mod transport;

pub use call::{ApiCall, ApiRequest, CachePolicy, GraphQlCall, HttpMethod, RestCall};
pub use config::RetryPolicy;
pub use executor::{ApiResponse, ExecutorStats, RequestExecutor, StatsSnapshot};
pub use github::GitHubTransport;
pub use outcome::{classify, Outcome};
pub use transport::{QuotaSnapshot, RawResponse, Transport, TransportError};

use crate::credentials::PoolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy shared by the executor, the failure ledger and run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Quota exhausted; absorbed by the executor unless its round bound is hit
    RateLimited,
    /// 5xx, timeout or network error after the retry budget
    TransientServerError,
    /// 4xx other than a rate limit
    PermanentClientError,
    /// Body not in the promised shape
    MalformedResponse,
    /// Empty credential pool
    NoCredentialsConfigured,
    /// Checkpoint, ledger or entity store unusable
    StorageUnavailable,
    /// Stop requested
    Cancelled,
}

impl FailureKind {
    /// Whether the failure must abort a whole run
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            FailureKind::NoCredentialsConfigured
                | FailureKind::StorageUnavailable
                | FailureKind::Cancelled
        )
    }

    /// Stable snake_case label
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::TransientServerError => "transient_server_error",
            FailureKind::PermanentClientError => "permanent_client_error",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::NoCredentialsConfigured => "no_credentials_configured",
            FailureKind::StorageUnavailable => "storage_unavailable",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by [`RequestExecutor::execute`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// Retry budget spent on 5xx, timeouts or network errors
    #[error("transient failure after {attempts} attempts: {message}")]
    Transient {
        /// Attempts made, including the first
        attempts: u32,
        /// Last failure
        message: String,
    },

    /// Non-retryable client error
    #[error("client error {status}: {message}")]
    PermanentClient {
        /// HTTP status
        status: u16,
        /// Server message
        message: String,
    },

    /// Response body not in the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The server kept rate limiting past the round bound
    #[error("still rate limited after {rounds} rounds")]
    RateLimitRoundsExceeded {
        /// Rounds attempted
        rounds: u32,
    },

    /// Credential pool failure
    #[error(transparent)]
    Credentials(#[from] PoolError),

    /// Stop requested while the call was pending
    #[error("request cancelled by shutdown")]
    Cancelled,
}

impl RequestError {
    /// Classification of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            RequestError::Transient { .. } => FailureKind::TransientServerError,
            RequestError::PermanentClient { .. } => FailureKind::PermanentClientError,
            RequestError::Malformed(_) => FailureKind::MalformedResponse,
            RequestError::RateLimitRoundsExceeded { .. } => FailureKind::RateLimited,
            RequestError::Credentials(PoolError::NoCredentialsConfigured) => {
                FailureKind::NoCredentialsConfigured
            }
            RequestError::Credentials(PoolError::Exhausted { .. }) => FailureKind::RateLimited,
            RequestError::Credentials(PoolError::Cancelled) | RequestError::Cancelled => {
                FailureKind::Cancelled
            }
        }
    }

    /// Whether this error must abort the surrounding run
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}
