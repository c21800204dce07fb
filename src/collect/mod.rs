//! Collection strategy and progress tracking
//!
//! The search API returns at most [`DEFAULT_RESULT_CAP`] results per query,
//! so a sweep over a creation-date range is partitioned into [`Period`]s
//! small enough to stay under the cap. Dense periods are subdivided on the
//! fly and the pending queue is checkpointed after every period.

pub mod period;
pub mod tracker;

pub use period::{periods_needed, plan_periods, Period};
pub use tracker::{CollectionTracker, SweepRequest, SweepSummary};

use crate::request::{FailureKind, RequestError};
use crate::resume::ResumeError;

/// Maximum results the search API returns for one query
pub const DEFAULT_RESULT_CAP: u64 = 1000;

/// Target share of the cap a planned period should hold
pub const DEFAULT_FILL_RATIO: f64 = 0.5;

/// Subdivision depth after which a dense period fails the sweep
pub const DEFAULT_MAX_DEPTH: u32 = 20;

/// Search results requested per page
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Collection errors
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Range or tuning parameters are unusable
    #[error("invalid sweep: {0}")]
    InvalidSweep(String),

    /// The checkpoint belongs to a different range
    #[error("checkpoint does not match this sweep: {0}")]
    CheckpointMismatch(String),

    /// A period still exceeds the cap but cannot be split further
    #[error("period {period} holds {total} results and cannot be subdivided further")]
    PeriodTooDense {
        /// The offending period
        period: Period,
        /// Results reported for it
        total: u64,
    },

    /// The upfront estimate could not be obtained
    #[error("estimate query failed: {0}")]
    Request(#[from] RequestError),

    /// A fatal error stopped the sweep; `next_period` is where a resume starts
    #[error("sweep aborted ({kind}): {message}")]
    Aborted {
        /// Classification
        kind: FailureKind,
        /// What went wrong
        message: String,
        /// First pending period
        next_period: Option<Period>,
    },

    /// Run state or lock failure
    #[error(transparent)]
    Resume(#[from] ResumeError),
}
