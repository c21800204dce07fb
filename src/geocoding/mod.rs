//! Location normalisation and cached geocoding
//!
//! Free-text profile locations ("Berlin, DE", "  san francisco ") are
//! normalised into a stable key and resolved at most once per TTL. A
//! built-in alias table answers the common cases without a network call.

pub mod cache;
pub mod countries;
pub mod nominatim;

pub use cache::{GeoLookup, GeocodeStats, GeocodingCache};
pub use countries::{country_name, lookup_country};
pub use nominatim::NominatimProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Geocoding errors
#[derive(Debug, thiserror::Error)]
pub enum GeocodingError {
    /// The provider could not be reached or answered with an error
    #[error("geocoding provider error: {0}")]
    Provider(String),

    /// The provider answered with an unexpected body
    #[error("malformed geocoding response: {0}")]
    Malformed(String),
}

/// A resolved location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 code, upper case
    pub country_code: String,
    /// English country name
    pub country_name: String,
    /// State, province or similar
    #[serde(default)]
    pub region: Option<String>,
    /// Latitude, when the provider resolved coordinates
    #[serde(default)]
    pub lat: Option<f64>,
    /// Longitude, when the provider resolved coordinates
    #[serde(default)]
    pub lon: Option<f64>,
}

/// Resolves normalised location text
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Look up `text`. `Ok(None)` means the provider has no match.
    async fn lookup(&self, text: &str) -> Result<Option<GeoLocation>, GeocodingError>;
}

/// Trim, lowercase and collapse inner whitespace
pub fn normalize_location(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
