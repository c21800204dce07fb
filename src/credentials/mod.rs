//! Credential pool with observed quota windows
//!
//! Every outbound call is made with the credential that currently has the
//! most remaining quota. Quota numbers come exclusively from response
//! metadata recorded by the request executor; the pool never estimates them.

pub mod pool;

pub use pool::{ApiToken, Credential, CredentialId, CredentialPool};

use chrono::{DateTime, Utc};

/// Credential pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool was built without any credential. Fatal, never retried.
    #[error("no API credentials configured")]
    NoCredentialsConfigured,

    /// Every credential is out of quota until `resume_at`.
    #[error("all credentials exhausted until {resume_at}")]
    Exhausted {
        /// Earliest reset across the pool plus the safety margin
        resume_at: DateTime<Utc>,
    },

    /// A stop request arrived while waiting for quota.
    #[error("shutdown requested while waiting for quota")]
    Cancelled,
}
