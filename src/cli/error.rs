//! CLI error types and conversions

use crate::cache::CacheError;
use crate::collect::CollectError;
use crate::enrich::EnrichError;
use crate::geocoding::GeocodingError;
use crate::output::OutputError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Enrichment error
    #[error("enrichment error: {0}")]
    EnrichError(#[from] EnrichError),

    /// Collection error
    #[error("collection error: {0}")]
    CollectError(#[from] CollectError),

    /// Geocoding error
    #[error("geocoding error: {0}")]
    GeocodingError(#[from] GeocodingError),

    /// Cache error
    #[error("cache error: {0}")]
    CacheError(#[from] CacheError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
