//! Deterministic cache keys

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// SHA-256 hex digest identifying one logical request.
///
/// The digest covers the endpoint and the parameter *set*. Parameters live in
/// a `BTreeMap`, so insertion order never changes the key, and every field is
/// length-prefixed so `("ab", "c")` and `("a", "bc")` cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `endpoint` called with `params`
    pub fn derive(endpoint: &str, params: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        feed(&mut hasher, endpoint.as_bytes());
        hasher.update((params.len() as u64).to_le_bytes());
        for (name, value) in params {
            feed(&mut hasher, name.as_bytes());
            feed(&mut hasher, value.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard directory for this key
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_ignores_parameter_order() {
        let a = CacheKey::derive("search/repositories", &params(&[("q", "rust"), ("page", "2")]));
        let b = CacheKey::derive("search/repositories", &params(&[("page", "2"), ("q", "rust")]));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_key_distinguishes_endpoint_and_values() {
        let base = CacheKey::derive("repos", &params(&[("q", "rust")]));
        assert_ne!(base, CacheKey::derive("users", &params(&[("q", "rust")])));
        assert_ne!(base, CacheKey::derive("repos", &params(&[("q", "go")])));
    }

    #[test]
    fn test_length_prefix_prevents_concatenation_collisions() {
        let a = CacheKey::derive("e", &params(&[("ab", "c")]));
        let b = CacheKey::derive("e", &params(&[("a", "bc")]));
        assert_ne!(a, b);
    }
}
