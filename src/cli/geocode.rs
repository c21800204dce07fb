//! Geocode command implementation

use super::{Cli, CliError, OutputFormat};
use crate::cache::ResponseCache;
use crate::geocoding::{GeoLocation, GeoLookup, GeocodingCache, NominatimProvider};
use crate::output::{read_locations, read_store_locations, CsvEntityStore, EntityStore};
use crate::shutdown::SharedShutdown;
use crate::FieldMap;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Rows staged before the entity store is committed
const COMMIT_EVERY: usize = 100;

/// Geocode command arguments
#[derive(Parser, Debug)]
pub struct GeocodeArgs {
    /// Location CSV (`id,location`)
    #[arg(long, required_unless_present = "owners", conflicts_with = "owners")]
    pub input: Option<PathBuf>,

    /// Owner store written by `enrich-owners`; geocodes each profile location
    #[arg(long)]
    pub owners: Option<PathBuf>,

    /// Entity store CSV receiving country fields
    #[arg(long)]
    pub output: PathBuf,

    /// Nominatim endpoint
    #[arg(long, default_value = crate::geocoding::nominatim::NOMINATIM_URL)]
    pub nominatim_url: String,

    /// Days a resolved location stays cached
    #[arg(long, default_value_t = 30)]
    pub found_ttl_days: u64,

    /// Days an unresolvable location stays cached
    #[arg(long, default_value_t = 7)]
    pub not_found_ttl_days: u64,
}

#[derive(Debug, Default, serde::Serialize)]
struct GeocodeSummary {
    locations: u64,
    found: u64,
    not_found: u64,
    errors: u64,
    cache_hits: u64,
    table_hits: u64,
    provider_calls: u64,
    interrupted: bool,
}

impl GeocodeArgs {
    /// Execute the geocode command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let records = match (&self.input, &self.owners) {
            (Some(input), _) => read_locations(input)?,
            (None, Some(owners)) => read_store_locations(owners)?,
            (None, None) => Vec::new(),
        };
        let cache = ResponseCache::open(&cli.cache_dir)?;
        let provider = NominatimProvider::new(&self.nominatim_url)?;
        let geocoder = GeocodingCache::new(cache, Arc::new(provider)).with_ttls(
            days(self.found_ttl_days),
            days(self.not_found_ttl_days),
        );
        let mut store = CsvEntityStore::open(&self.output)?;

        let progress = create_progress_bar(records.len() as u64);
        let mut summary = GeocodeSummary {
            locations: records.len() as u64,
            ..Default::default()
        };

        for (idx, record) in records.iter().enumerate() {
            if shutdown.is_shutdown_requested() {
                summary.interrupted = true;
                break;
            }
            match geocoder.lookup(&record.location).await {
                Ok(GeoLookup::Found(location)) => {
                    summary.found += 1;
                    store.upsert_derived_fields(record.id, &location_fields(&location))?;
                }
                Ok(GeoLookup::NotFound) => summary.not_found += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(id = record.id, location = %record.location, error = %e, "Geocoding failed");
                }
            }
            if (idx + 1) % COMMIT_EVERY == 0 {
                store.commit()?;
            }
            progress.inc(1);
        }
        store.commit()?;
        progress.finish_and_clear();

        let stats = geocoder.stats();
        summary.cache_hits = stats.cache_hits;
        summary.table_hits = stats.table_hits;
        summary.provider_calls = stats.provider_calls;
        info!(
            found = summary.found,
            not_found = summary.not_found,
            errors = summary.errors,
            provider_calls = summary.provider_calls,
            "Geocoding finished"
        );

        match cli.output_format {
            OutputFormat::Json => match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Failed to encode summary: {e}"),
            },
            OutputFormat::Human => {
                if summary.interrupted {
                    println!("\nGeocoding interrupted.");
                } else {
                    println!("\nGeocoding completed successfully!");
                }
                println!("Output: {}", self.output.display());
                println!("Locations: {}", summary.locations);
                println!("Found: {}", summary.found);
                println!("Not found: {}", summary.not_found);
                println!("Errors: {}", summary.errors);
                println!(
                    "Answered by: {} cache, {} table, {} provider",
                    summary.cache_hits, summary.table_hits, summary.provider_calls
                );
            }
        }
        Ok(())
    }
}

fn location_fields(location: &GeoLocation) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("country_code".to_string(), json!(location.country_code));
    fields.insert("country_name".to_string(), json!(location.country_name));
    if let Some(region) = &location.region {
        fields.insert("region".to_string(), json!(region));
    }
    if let (Some(lat), Some(lon)) = (location.lat, location.lon) {
        fields.insert("latitude".to_string(), json!(lat));
        fields.insert("longitude".to_string(), json!(lon));
    }
    fields
}

fn days(d: u64) -> Duration {
    Duration::from_secs(d.saturating_mul(24 * 60 * 60))
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message("geocoding locations");
    pb
}
