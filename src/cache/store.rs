//! File-per-key cache storage with atomic writes

use super::{CacheError, CacheKey};
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const SHARD_LOCK_FILE: &str = "shard.lock";

/// Cached response body or cached negative result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedPayload {
    /// Successful payload
    Success {
        /// Response body
        body: Value,
    },
    /// Permanent failure remembered to avoid re-asking
    Failure {
        /// HTTP status
        status: u16,
        /// Server message
        message: String,
    },
}

/// One stored cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    key: CacheKey,
    endpoint: String,
    payload: CachedPayload,
    stored_at: DateTime<Utc>,
    ttl_ms: u64,
}

impl CacheEntry {
    fn new(key: CacheKey, endpoint: &str, payload: CachedPayload, ttl: Duration) -> Self {
        Self {
            key,
            endpoint: endpoint.to_string(),
            payload,
            stored_at: Utc::now(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Key the entry is stored under
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Endpoint label
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stored payload
    pub fn payload(&self) -> &CachedPayload {
        &self.payload
    }

    /// When the entry was written
    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    /// Time to live
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// An entry is expired once `stored_at + ttl` has been reached
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds);
        match ttl.and_then(|ttl| self.stored_at.checked_add_signed(ttl)) {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    fn into_payload(self) -> CachedPayload {
        self.payload
    }
}

/// Response cache rooted at a directory
#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    /// Open (creating if needed) a cache directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir {}: {e}", root.display())))?;
        debug!(root = %root.display(), "Opened response cache");
        Ok(Self { root })
    }

    /// Cache directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh payload for `key`, if any. Expired entries are pruned.
    pub fn get(&self, key: &CacheKey) -> Result<Option<CachedPayload>, CacheError> {
        Ok(self.get_entry(key)?.map(CacheEntry::into_payload))
    }

    /// Fresh entry for `key`, if any. Expired entries are pruned.
    pub fn get_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let mut lock = RwLock::new(self.open_lock(key)?);

        {
            let _guard = lock
                .read()
                .map_err(|e| CacheError::Lock(format!("Failed to acquire read lock: {e}")))?;
            match read_entry(&path)? {
                None => return Ok(None),
                Some(entry) if !entry.is_expired_at(Utc::now()) => return Ok(Some(entry)),
                Some(_) => {}
            }
        }

        let _guard = lock
            .write()
            .map_err(|e| CacheError::Lock(format!("Failed to acquire write lock: {e}")))?;
        // Another writer may have refreshed the entry between the two locks.
        if let Some(entry) = read_entry(&path)? {
            if !entry.is_expired_at(Utc::now()) {
                return Ok(Some(entry));
            }
            remove_if_present(&path)?;
            debug!(key = %key, endpoint = %entry.endpoint, "Pruned expired cache entry");
        }
        Ok(None)
    }

    /// Store `payload` for `key`, replacing any previous entry
    pub fn put(
        &self,
        key: &CacheKey,
        endpoint: &str,
        payload: CachedPayload,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let entry = CacheEntry::new(key.clone(), endpoint, payload, ttl);
        let json = serde_json::to_vec(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut lock = RwLock::new(self.open_lock(key)?);
        let _guard = lock
            .write()
            .map_err(|e| CacheError::Lock(format!("Failed to acquire write lock: {e}")))?;

        let shard_dir = self.shard_dir(key);
        let mut temp_file = tempfile::NamedTempFile::new_in(&shard_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(&json)
            .map_err(|e| CacheError::Io(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CacheError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CacheError::Io(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| CacheError::Io(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = File::open(&shard_dir) {
            let _ = dir.sync_all();
        }

        debug!(key = %key, endpoint = endpoint, ttl_secs = ttl.as_secs(), "Stored cache entry");
        Ok(())
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        let mut lock = RwLock::new(self.open_lock(key)?);
        let _guard = lock
            .write()
            .map_err(|e| CacheError::Lock(format!("Failed to acquire write lock: {e}")))?;
        remove_if_present(&path)
    }

    fn shard_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.shard())
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.shard_dir(key).join(format!("{}.json", key.as_str()))
    }

    /// One lock file per shard keeps the lock count bounded by the shard count
    fn open_lock(&self, key: &CacheKey) -> Result<File, CacheError> {
        let shard_dir = self.shard_dir(key);
        std::fs::create_dir_all(&shard_dir).map_err(|e| CacheError::Io(e.to_string()))?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(shard_dir.join(SHARD_LOCK_FILE))
            .map_err(|e| CacheError::Lock(format!("Failed to open lock file: {e}")))
    }
}

fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::Io(e.to_string())),
    };
    match serde_json::from_slice(&contents) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable cache entry treated as miss");
            Ok(None)
        }
    }
}

fn remove_if_present(path: &Path) -> Result<bool, CacheError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::Io(e.to_string())),
    }
}
