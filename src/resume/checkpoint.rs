//! Checkpoint types for resumable runs

use crate::collect::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Durable marker of the last completed unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    checkpoint_type: CheckpointType,
    processed: u64,
    failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ledger_path: Option<PathBuf>,
    completed_at: i64,
}

impl Checkpoint {
    /// Create a checkpoint with cumulative counts
    pub fn new(checkpoint_type: CheckpointType, processed: u64, failed: u64) -> Self {
        Self {
            checkpoint_type,
            processed,
            failed,
            ledger_path: None,
            completed_at: Utc::now().timestamp_millis(),
        }
    }

    /// Record where failures for this run are written
    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = Some(path.into());
        self
    }

    /// Get the checkpoint type
    pub fn checkpoint_type(&self) -> &CheckpointType {
        &self.checkpoint_type
    }

    /// Items settled so far (succeeded plus failed)
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Items that failed so far
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Failure ledger location
    pub fn ledger_path(&self) -> Option<&Path> {
        self.ledger_path.as_deref()
    }

    /// Get the completion timestamp (Unix milliseconds)
    pub fn completed_at(&self) -> i64 {
        self.completed_at
    }

    /// Index of the last completed batch, for batch checkpoints
    pub fn last_completed_batch(&self) -> Option<u64> {
        match &self.checkpoint_type {
            CheckpointType::Batch { last_completed, .. } => Some(*last_completed),
            CheckpointType::Period { .. } => None,
        }
    }
}

/// Type of checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "checkpoint_type", rename_all = "snake_case")]
pub enum CheckpointType {
    /// Batch enrichment progress
    Batch {
        /// Last batch whose results are durable
        last_completed: u64,
        /// Batches in the partition
        total_batches: u64,
        /// Items per batch the partition was cut with
        batch_size: usize,
        /// SHA-256 over the ordered entity ids
        population_digest: String,
    },
    /// Period sweep progress
    Period {
        /// Inclusive start of the full sweep
        range_start: DateTime<Utc>,
        /// Exclusive end of the full sweep
        range_end: DateTime<Utc>,
        /// Search qualifiers every query of the sweep carries
        #[serde(default)]
        qualifiers: String,
        /// Periods not yet collected, in chronological order
        pending: Vec<Period>,
        /// End of the last fully collected period
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_through: Option<DateTime<Utc>>,
        /// Upfront estimate the plan was built from
        estimated_total: u64,
    },
}
