//! Durable response cache
//!
//! Maps a deterministic [`CacheKey`] to a stored response with a TTL. Entries
//! live as one JSON file per key, sharded by the first two hex characters,
//! and every access is coordinated through an fd-lock advisory lock so that
//! several processes can share one cache directory.

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, CachedPayload, ResponseCache};

/// Response cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem failure
    #[error("cache I/O error: {0}")]
    Io(String),

    /// Entry could not be encoded or decoded
    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// Advisory lock could not be taken
    #[error("cache lock error: {0}")]
    Lock(String),
}
