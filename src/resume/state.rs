//! Run state persistence
//!
//! Atomic file writes and schema versioning for the per-target checkpoint
//! document.

use super::checkpoint::Checkpoint;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Current run state schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed state file size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// What a run target is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Batch enrichment
    Enrich,
    /// Period sweep
    Collect,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, nothing processed
    NotStarted,
    /// In progress (or crashed while in progress)
    Running,
    /// Every batch or period done
    Completed,
    /// Stopped early by a stop request or a fatal error; resumable
    Interrupted,
}

/// Persisted state for one run target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    schema_version: String,
    target: String,
    kind: RunKind,
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checkpoint: Option<Checkpoint>,
    metadata: StateMetadata,
    created_at: i64,
    updated_at: i64,
}

impl RunState {
    /// Create a new run state
    pub fn new(target: impl Into<String>, kind: RunKind) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            target: target.into(),
            kind,
            status: RunStatus::NotStarted,
            checkpoint: None,
            metadata: StateMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Run target name
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run kind
    pub fn kind(&self) -> RunKind {
        self.kind
    }

    /// Current status
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Latest checkpoint
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    /// Get the metadata
    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    /// Last update (Unix milliseconds)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Move to `status`, counting starts and recording the last error
    pub fn set_status(&mut self, status: RunStatus, error: Option<String>) {
        if status == RunStatus::Running && self.status != RunStatus::Running {
            self.metadata.runs_started += 1;
        }
        if error.is_some() {
            self.metadata.last_error = error;
        } else if status == RunStatus::Completed {
            self.metadata.last_error = None;
        }
        self.status = status;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Replace the checkpoint. Only the latest one is ever needed to resume.
    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.metadata.total_checkpoints += 1;
        debug!(
            target = %self.target,
            checkpoint_type = ?checkpoint.checkpoint_type(),
            processed = checkpoint.processed(),
            failed = checkpoint.failed(),
            "Advancing checkpoint"
        );
        self.checkpoint = Some(checkpoint);
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Save state to file with atomic writes and file locking
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        debug!(path = %path.display(), status = ?self.status, "Saving run state");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;

        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;

        // Flush and sync before the rename so a crash never exposes a torn file
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;

        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        // Fsync parent directory to ensure the rename is durable
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        debug!(
            path = %path.display(),
            total_checkpoints = self.metadata.total_checkpoints,
            "Run state saved"
        );
        Ok(())
    }

    /// Load state from file with locking
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        debug!(path = %path.display(), "Loading run state");

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;

        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let state: RunState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize run state");
            ResumeError::DeserializationError(e.to_string())
        })?;

        if let Err(e) = state.validate_schema_version() {
            warn!(
                found_version = %state.schema_version,
                expected_version = SCHEMA_VERSION,
                "Run state schema version mismatch"
            );
            return Err(e);
        }

        info!(
            target = %state.target,
            status = ?state.status,
            checkpoints = state.metadata.total_checkpoints,
            "Run state loaded"
        );
        Ok(state)
    }

    /// Load state if the file exists
    pub fn load_optional(path: &Path) -> Result<Option<Self>, ResumeError> {
        match std::fs::metadata(path) {
            Ok(_) => Self::load(path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ResumeError::IoError(e.to_string())),
        }
    }
}

/// Cumulative bookkeeping about a run target
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateMetadata {
    total_checkpoints: u64,
    runs_started: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl StateMetadata {
    /// Get total checkpoints
    pub fn total_checkpoints(&self) -> u64 {
        self.total_checkpoints
    }

    /// How many times the run was (re)started
    pub fn runs_started(&self) -> u64 {
        self.runs_started
    }

    /// Error that last interrupted the run
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Errors related to run state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Another process holds the run target
    #[error("run target '{0}' is locked by another process")]
    TargetBusy(String),

    /// Run target name unusable
    #[error("invalid run target: {0}")]
    InvalidTarget(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
