//! Credential selection and quota bookkeeping

use super::PoolError;
use crate::metrics;
use crate::shutdown::{self, SharedShutdown};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Margin added on top of the earliest reset before retrying an exhausted pool.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// Label identifying a credential in logs, metrics and quota updates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialId(String);

impl CredentialId {
    /// Wrap a label
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Borrow the label
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret API token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token for the authorization header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

/// An API access token tracked with its own quota window
#[derive(Debug, Clone)]
pub struct Credential {
    id: CredentialId,
    token: ApiToken,
    remaining: Option<u32>,
    reset_at: Option<DateTime<Utc>>,
    observed_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create a credential whose quota has not been observed yet
    pub fn new(id: CredentialId, token: ApiToken) -> Self {
        Self {
            id,
            token,
            remaining: None,
            reset_at: None,
            observed_at: None,
        }
    }

    /// Credential label
    pub fn id(&self) -> &CredentialId {
        &self.id
    }

    /// Secret token
    pub fn token(&self) -> &ApiToken {
        &self.token
    }

    /// Last reported remaining quota, if any response has been seen
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Last reported reset instant
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.reset_at
    }

    /// When quota metadata was last recorded
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.observed_at
    }

    /// Whether the last observed window has already rolled over
    fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.reset_at.map(|reset| reset <= now).unwrap_or(false)
    }

    /// Remaining quota for ranking. Unobserved or rolled-over windows rank first.
    fn effective_remaining(&self, now: DateTime<Utc>) -> u64 {
        match self.remaining {
            None => u64::MAX,
            Some(_) if self.window_elapsed(now) => u64::MAX,
            Some(n) => n as u64,
        }
    }

    fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.effective_remaining(now) > 0
    }
}

/// Pool of credentials; selects the best candidate per request
#[derive(Debug)]
pub struct CredentialPool {
    credentials: Mutex<Vec<Credential>>,
    safety_margin: Duration,
}

impl CredentialPool {
    /// Build a pool from raw tokens, labelled `token-0`, `token-1`, ...
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credentials = tokens
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.trim().is_empty())
            .enumerate()
            .map(|(idx, token)| {
                Credential::new(
                    CredentialId::new(format!("token-{idx}")),
                    ApiToken::new(token.trim()),
                )
            })
            .collect();
        Self::from_credentials(credentials)
    }

    /// Build a pool from prepared credentials
    pub fn from_credentials(credentials: Vec<Credential>) -> Self {
        if credentials.is_empty() {
            warn!("Credential pool created without any credentials");
        } else {
            info!(credentials = credentials.len(), "Credential pool initialised");
        }
        Self {
            credentials: Mutex::new(credentials),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    /// Override the margin added after the earliest reset
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Number of configured credentials
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no credential is configured
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Point-in-time copy of every credential's quota state
    pub fn snapshot(&self) -> Vec<Credential> {
        self.lock().clone()
    }

    /// Pick the credential with the most remaining quota.
    ///
    /// Ties go to the credential whose window resets soonest. When every
    /// credential is exhausted the error carries the instant to resume at.
    pub fn select_credential(&self) -> Result<Credential, PoolError> {
        self.select_at(Utc::now())
    }

    fn select_at(&self, now: DateTime<Utc>) -> Result<Credential, PoolError> {
        let credentials = self.lock();
        if credentials.is_empty() {
            return Err(PoolError::NoCredentialsConfigured);
        }

        let best = credentials
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_available(now))
            .max_by(|(ia, a), (ib, b)| {
                a.effective_remaining(now)
                    .cmp(&b.effective_remaining(now))
                    // earlier reset wins, so compare reversed
                    .then_with(|| b.reset_at.cmp(&a.reset_at))
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(_, c)| c.clone());

        if let Some(credential) = best {
            debug!(
                credential = %credential.id,
                remaining = ?credential.remaining,
                "Selected credential"
            );
            return Ok(credential);
        }

        let earliest = credentials
            .iter()
            .filter_map(|c| c.reset_at)
            .min()
            .unwrap_or(now);
        let margin = chrono::Duration::from_std(self.safety_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Err(PoolError::Exhausted {
            resume_at: earliest + margin,
        })
    }

    /// Record authoritative quota metadata returned by the API for `id`.
    pub fn record_usage(&self, id: &CredentialId, remaining: u32, reset_at: DateTime<Utc>) {
        let mut credentials = self.lock();
        match credentials.iter_mut().find(|c| &c.id == id) {
            Some(credential) => {
                credential.remaining = Some(remaining);
                credential.reset_at = Some(reset_at);
                credential.observed_at = Some(Utc::now());
                metrics::record_quota(id.as_str(), remaining);
                debug!(
                    credential = %id,
                    remaining = remaining,
                    reset_at = %reset_at,
                    "Recorded quota observation"
                );
            }
            None => warn!(credential = %id, "Quota update for unknown credential ignored"),
        }
    }

    /// Block until at least one credential has quota.
    ///
    /// Returns immediately if one already does. Each suspension is bounded by
    /// the earliest reset across the pool plus the safety margin.
    pub async fn wait_until_available(
        &self,
        shutdown: Option<&SharedShutdown>,
    ) -> Result<(), PoolError> {
        self.acquire(shutdown).await.map(|_| ())
    }

    /// Select a credential, suspending while the whole pool is exhausted.
    pub async fn acquire(&self, shutdown: Option<&SharedShutdown>) -> Result<Credential, PoolError> {
        loop {
            match self.select_credential() {
                Ok(credential) => return Ok(credential),
                Err(PoolError::Exhausted { resume_at }) => {
                    let wait = (resume_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    warn!(
                        resume_at = %resume_at,
                        wait_secs = wait.as_secs(),
                        "All credentials exhausted, suspending until quota resets"
                    );
                    metrics::record_quota_wait(wait);
                    if !shutdown::sleep_or_shutdown(wait, shutdown).await {
                        return Err(PoolError::Cancelled);
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Credential>> {
        // A panic while holding the lock cannot leave a half-updated credential
        // behind, so a poisoned guard is still consistent.
        self.credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
