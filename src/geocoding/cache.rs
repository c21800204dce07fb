//! Response-cache backed geocoding

use super::{countries, normalize_location, GeoLocation, GeocodingError, GeocodingProvider};
use crate::cache::{CacheKey, CachedPayload, ResponseCache};
use crate::metrics;
use crate::request::config::{DEFAULT_CACHE_TTL, DEFAULT_NEGATIVE_TTL};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache endpoint name for geocoding entries
pub const GEOCODE_ENDPOINT: &str = "geocode";

/// Result of a geocoding lookup
#[derive(Debug, Clone, PartialEq)]
pub enum GeoLookup {
    /// Resolved location
    Found(GeoLocation),
    /// Nothing matched; cached for the negative TTL
    NotFound,
}

/// Where lookups were answered from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeocodeStats {
    /// Answered by the response cache
    pub cache_hits: u64,
    /// Answered by the built-in table
    pub table_hits: u64,
    /// Sent to the provider
    pub provider_calls: u64,
}

/// Geocoder that resolves each normalised location at most once per TTL
pub struct GeocodingCache {
    cache: ResponseCache,
    provider: Arc<dyn GeocodingProvider>,
    found_ttl: Duration,
    not_found_ttl: Duration,
    cache_hits: AtomicU64,
    table_hits: AtomicU64,
    provider_calls: AtomicU64,
}

impl GeocodingCache {
    /// Create a geocoder storing results in `cache`
    pub fn new(cache: ResponseCache, provider: Arc<dyn GeocodingProvider>) -> Self {
        Self {
            cache,
            provider,
            found_ttl: DEFAULT_CACHE_TTL * 30,
            not_found_ttl: DEFAULT_NEGATIVE_TTL,
            cache_hits: AtomicU64::new(0),
            table_hits: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
        }
    }

    /// Override the TTLs for found and not-found results
    pub fn with_ttls(mut self, found_ttl: Duration, not_found_ttl: Duration) -> Self {
        self.found_ttl = found_ttl;
        self.not_found_ttl = not_found_ttl;
        self
    }

    /// Counters since creation
    pub fn stats(&self) -> GeocodeStats {
        GeocodeStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            table_hits: self.table_hits.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
        }
    }

    /// Cache key for location text
    pub fn key_for(text: &str) -> CacheKey {
        let mut params = BTreeMap::new();
        params.insert("q".to_string(), normalize_location(text));
        CacheKey::derive(GEOCODE_ENDPOINT, &params)
    }

    /// Resolve `text`.
    ///
    /// Provider errors are returned and never cached, so the next lookup
    /// retries. Cache read failures degrade to a miss.
    pub async fn lookup(&self, text: &str) -> Result<GeoLookup, GeocodingError> {
        let normalized = normalize_location(text);
        if normalized.is_empty() {
            return Ok(GeoLookup::NotFound);
        }
        let key = Self::key_for(&normalized);

        match self.cache.get(&key) {
            Ok(Some(CachedPayload::Success { body })) => {
                match serde_json::from_value::<GeoLocation>(body) {
                    Ok(location) => {
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache_lookup(GEOCODE_ENDPOINT, true);
                        return Ok(GeoLookup::Found(location));
                    }
                    Err(e) => warn!(location = %normalized, error = %e, "Ignoring unreadable geocode entry"),
                }
            }
            Ok(Some(CachedPayload::Failure { .. })) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(GEOCODE_ENDPOINT, true);
                return Ok(GeoLookup::NotFound);
            }
            Ok(None) => {}
            Err(e) => warn!(location = %normalized, error = %e, "Geocode cache read failed, treating as miss"),
        }
        metrics::record_cache_lookup(GEOCODE_ENDPOINT, false);

        if let Some(code) = countries::lookup_country(&normalized) {
            self.table_hits.fetch_add(1, Ordering::Relaxed);
            let location = GeoLocation {
                country_code: code.to_string(),
                country_name: countries::country_name(code).unwrap_or_default().to_string(),
                region: None,
                lat: None,
                lon: None,
            };
            debug!(location = %normalized, country = code, "Resolved from built-in table");
            self.store(&key, &normalized, found_payload(&location), self.found_ttl);
            return Ok(GeoLookup::Found(location));
        }

        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        match self.provider.lookup(&normalized).await? {
            Some(location) => {
                self.store(&key, &normalized, found_payload(&location), self.found_ttl);
                Ok(GeoLookup::Found(location))
            }
            None => {
                debug!(location = %normalized, "No geocoding match");
                let payload = Ok(CachedPayload::Failure {
                    status: 404,
                    message: "no match".to_string(),
                });
                self.store(&key, &normalized, payload, self.not_found_ttl);
                Ok(GeoLookup::NotFound)
            }
        }
    }

    /// Cache a resolved lookup. Failures are logged; the answer still stands.
    fn store(
        &self,
        key: &CacheKey,
        normalized: &str,
        payload: Result<CachedPayload, serde_json::Error>,
        ttl: Duration,
    ) {
        let stored = payload
            .map_err(|e| e.to_string())
            .and_then(|payload| {
                self.cache
                    .put(key, GEOCODE_ENDPOINT, payload, ttl)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = stored {
            warn!(location = %normalized, error = %e, "Failed to cache geocode result");
        }
    }
}

fn found_payload(location: &GeoLocation) -> Result<CachedPayload, serde_json::Error> {
    serde_json::to_value(location).map(|body| CachedPayload::Success { body })
}
