//! Entity store, repository sink and population source
//!
//! The ingestion engine only talks to the [`EntityStore`] and
//! [`RepositorySink`] traits; the CSV implementations in [`csv`] make the
//! binary runnable end to end without a database.

use crate::{FieldMap, RepositoryRecord};

pub mod csv;

pub use self::csv::{
    read_locations, read_owners, read_population, read_store_locations, CsvEntityStore,
    CsvRepositorySink, LocationRecord, OwnerRecord, PopulationRecord,
};

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV read or write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Durable home of derived fields attached to persisted entities
pub trait EntityStore: Send {
    /// Stage derived fields for `entity_id`. Re-applying the same fields is harmless.
    fn upsert_derived_fields(&mut self, entity_id: u64, fields: &FieldMap) -> OutputResult<()>;

    /// Make every staged upsert durable
    fn commit(&mut self) -> OutputResult<()>;
}

/// Destination for repositories found by a collection sweep
pub trait RepositorySink: Send {
    /// Stage one repository
    fn write_repository(&mut self, record: &RepositoryRecord) -> OutputResult<()>;

    /// Make every staged repository durable
    fn commit(&mut self) -> OutputResult<()>;
}
