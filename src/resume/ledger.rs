//! Append-only failure ledger (JSON lines)

use super::state::ResumeError;
use crate::request::FailureKind;
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One failed work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Entity that failed
    pub entity_id: u64,
    /// Classification
    pub kind: FailureKind,
    /// Error message
    pub message: String,
    /// When the failure was settled
    pub recorded_at: DateTime<Utc>,
    /// Batch the item belonged to
    pub batch_index: u64,
}

impl FailureRecord {
    /// Record a failure now
    pub fn new(entity_id: u64, kind: FailureKind, message: impl Into<String>, batch_index: u64) -> Self {
        Self {
            entity_id,
            kind,
            message: message.into(),
            recorded_at: Utc::now(),
            batch_index,
        }
    }
}

/// Failure ledger for one run target
#[derive(Debug, Clone)]
pub struct FailureLedger {
    path: PathBuf,
}

impl FailureLedger {
    /// Ledger at `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records and fsync before returning
    pub fn append(&self, records: &[FailureRecord]) -> Result<(), ResumeError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)
                .map_err(|e| ResumeError::SerializationError(e.to_string()))?;
            buffer.push(b'\n');
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ResumeError::IoError(format!("Failed to open ledger: {e}")))?;
        let mut lock = RwLock::new(file);
        let mut guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to lock ledger: {e}")))?;

        guard
            .write_all(&buffer)
            .map_err(|e| ResumeError::IoError(format!("Failed to append to ledger: {e}")))?;
        guard
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush ledger: {e}")))?;
        guard
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync ledger: {e}")))?;

        debug!(path = %self.path.display(), records = records.len(), "Appended failure records");
        Ok(())
    }

    /// Every structured record in the ledger. Unparsable lines are skipped.
    pub fn read_records(&self) -> Result<Vec<FailureRecord>, ResumeError> {
        let mut records = Vec::new();
        for line in read_lines(&self.path)? {
            match serde_json::from_str::<FailureRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %self.path.display(), error = %e, "Skipping unparsable ledger line"),
            }
        }
        Ok(records)
    }

    /// Distinct failed entity ids in this ledger
    pub fn failed_ids(&self) -> Result<BTreeSet<u64>, ResumeError> {
        read_failed_ids(&self.path)
    }

    /// Move an existing ledger aside to `<stem>.<unix-ts>.jsonl`.
    ///
    /// Returns the new location, or `None` when there was nothing to rotate.
    pub fn rotate(&self) -> Result<Option<PathBuf>, ResumeError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() == 0 => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        }

        let stem = self
            .path
            .to_string_lossy()
            .trim_end_matches(".jsonl")
            .to_string();
        let mut stamp = Utc::now().timestamp();
        let mut rotated = PathBuf::from(format!("{stem}.{stamp}.jsonl"));
        while rotated.exists() {
            stamp += 1;
            rotated = PathBuf::from(format!("{stem}.{stamp}.jsonl"));
        }

        std::fs::rename(&self.path, &rotated)
            .map_err(|e| ResumeError::IoError(format!("Failed to rotate ledger: {e}")))?;
        info!(from = %self.path.display(), to = %rotated.display(), "Rotated failure ledger");
        Ok(Some(rotated))
    }
}

/// Failed entity ids from a ledger or a plain "one id per line" file.
///
/// A missing file yields an empty set.
pub fn read_failed_ids(path: &Path) -> Result<BTreeSet<u64>, ResumeError> {
    let mut ids = BTreeSet::new();
    for line in read_lines(path)? {
        if let Ok(record) = serde_json::from_str::<FailureRecord>(&line) {
            ids.insert(record.entity_id);
        } else if let Ok(id) = line.parse::<u64>() {
            ids.insert(id);
        } else {
            warn!(path = %path.display(), line = %line, "Skipping unrecognised ledger line");
        }
    }
    Ok(ids)
}

fn read_lines(path: &Path) -> Result<Vec<String>, ResumeError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ResumeError::IoError(e.to_string())),
    };
    let lock = RwLock::new(file);
    let guard = lock
        .read()
        .map_err(|e| ResumeError::LockError(format!("Failed to lock ledger: {e}")))?;

    let mut lines = Vec::new();
    for line in BufReader::new(&*guard).lines() {
        let line = line.map_err(|e| ResumeError::IoError(e.to_string()))?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}
