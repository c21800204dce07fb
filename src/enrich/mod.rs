//! Batch enrichment engine
//!
//! Re-visits persisted entities (repositories and their owners) and
//! attaches derived fields through the shared request executor. The population is cut into fixed-size batches;
//! a batch is the unit of durability (store commit, failure ledger, then
//! checkpoint) and a single item's failure never fails its batch.

pub mod engine;
pub mod enricher;
pub mod item;
pub mod owner;

pub use engine::{BatchEnrichmentEngine, RunOptions, RunSummary};
pub use enricher::{EnrichItem, Enricher, ItemError, RepoStatsEnricher};
pub use item::{StatField, WorkItem};
pub use owner::{unknown_owners, OwnerDetailsEnricher, OwnerItem, OwnerKind};

use crate::request::FailureKind;
use crate::resume::ResumeError;

/// Enrichment errors
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// Run options are unusable
    #[error("invalid run options: {0}")]
    InvalidOptions(String),

    /// Population input is unusable
    #[error("invalid population: {0}")]
    InvalidPopulation(String),

    /// The checkpoint belongs to a different population or batch size
    #[error("checkpoint does not match this run: {0}")]
    CheckpointMismatch(String),

    /// A fatal error stopped the run before batch `next_batch` was committed
    #[error("run aborted ({kind}) before batch {next_batch}: {message}")]
    Aborted {
        /// Classification
        kind: FailureKind,
        /// What went wrong
        message: String,
        /// First batch a resumed run will process
        next_batch: u64,
    },

    /// Run state, lock or ledger failure before processing began
    #[error(transparent)]
    Resume(#[from] ResumeError),
}
