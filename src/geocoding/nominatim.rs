//! OpenStreetMap Nominatim provider

use super::{countries, GeoLocation, GeocodingError, GeocodingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Public Nominatim endpoint
pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// Minimum spacing between calls required by the Nominatim usage policy
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

const REGION_FIELDS: &[&str] = &["state", "province", "county", "region", "state_district", "city"];

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
    #[serde(default)]
    address: HashMap<String, String>,
}

/// Throttled Nominatim client
pub struct NominatimProvider {
    client: Client,
    base_url: String,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl NominatimProvider {
    /// Create a provider for `base_url` (usually [`NOMINATIM_URL`])
    pub fn new(base_url: impl Into<String>) -> Result<Self, GeocodingError> {
        let client = Client::builder()
            .user_agent(concat!("github-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GeocodingError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a provider over an existing client and endpoint
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            min_interval: MIN_INTERVAL,
            last_call: Mutex::new(None),
        }
    }

    /// Override the spacing between calls
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    async fn throttle(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

#[async_trait]
impl GeocodingProvider for NominatimProvider {
    async fn lookup(&self, text: &str) -> Result<Option<GeoLocation>, GeocodingError> {
        self.throttle().await;
        debug!(location = %text, "Querying Nominatim");

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", text),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "1"),
                ("accept-language", "en"),
            ])
            .send()
            .await
            .map_err(|e| GeocodingError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodingError::Provider(format!("HTTP {status}")));
        }

        let hits: Vec<SearchHit> = response
            .json()
            .await
            .map_err(|e| GeocodingError::Malformed(e.to_string()))?;

        Ok(hits.into_iter().next().and_then(into_location))
    }
}

fn into_location(hit: SearchHit) -> Option<GeoLocation> {
    let country_code = hit.address.get("country_code")?.to_uppercase();
    let country_name = hit
        .address
        .get("country")
        .cloned()
        .or_else(|| countries::country_name(&country_code).map(str::to_string))
        .unwrap_or_default();
    let region = REGION_FIELDS
        .iter()
        .find_map(|field| hit.address.get(*field).filter(|v| !v.is_empty()).cloned());

    Some(GeoLocation {
        country_code,
        country_name,
        region,
        lat: hit.lat.parse().ok(),
        lon: hit.lon.parse().ok(),
    })
}
