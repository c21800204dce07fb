//! Run identity and the files keyed by it

use super::state::ResumeError;
use std::path::{Path, PathBuf};

/// Suffix of the run target used by failed-only retries
const RETRY_SUFFIX: &str = "retry";

/// Suffix of the run target used by dry runs
const DRY_RUN_SUFFIX: &str = "dry-run";

/// Identity a checkpoint, failure ledger and run lock are keyed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    name: String,
    state_dir: PathBuf,
}

impl RunTarget {
    /// Create a target. Characters outside `[A-Za-z0-9._-]` become `_`.
    pub fn new(state_dir: impl Into<PathBuf>, name: &str) -> Result<Self, ResumeError> {
        let name: String = name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(ResumeError::InvalidTarget(
                "run target name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            state_dir: state_dir.into(),
        })
    }

    /// Sanitised name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this target's files
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// `<state_dir>/<name>.checkpoint.json`
    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.checkpoint.json", self.name))
    }

    /// `<state_dir>/<name>.failures.jsonl`
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.failures.jsonl", self.name))
    }

    /// `<state_dir>/<name>.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.lock", self.name))
    }

    /// Separate target for a failed-only retry of this one
    pub fn retry_target(&self) -> RunTarget {
        self.with_suffix(RETRY_SUFFIX)
    }

    /// Separate target for a dry run, so rehearsals never move the real checkpoint
    pub fn dry_run_target(&self) -> RunTarget {
        self.with_suffix(DRY_RUN_SUFFIX)
    }

    fn with_suffix(&self, suffix: &str) -> RunTarget {
        RunTarget {
            name: format!("{}.{}", self.name, suffix),
            state_dir: self.state_dir.clone(),
        }
    }
}
