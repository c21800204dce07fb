//! Resume capability for enrichment runs and collection sweeps
//!
//! Provides persistent state management with atomic writes and file locking.

pub mod checkpoint;
pub mod ledger;
pub mod lock;
pub mod state;
pub mod target;

pub use checkpoint::{Checkpoint, CheckpointType};
pub use ledger::{read_failed_ids, FailureLedger, FailureRecord};
pub use lock::RunLock;
pub use state::{ResumeError, RunKind, RunState, RunStatus, StateMetadata};
pub use target::RunTarget;
