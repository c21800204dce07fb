//! Enrich-owners command implementation

use super::enrich::{output_human, output_json};
use super::{hours, parse_concurrency, Cli, CliError, OutputFormat};
use crate::enrich::{unknown_owners, BatchEnrichmentEngine, OwnerDetailsEnricher, OwnerItem, RunOptions};
use crate::output::{read_owners, CsvEntityStore};
use crate::request::config::{DEFAULT_BATCH_SIZE, DEFAULT_CACHE_TTL};
use crate::request::CachePolicy;
use crate::shutdown::SharedShutdown;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Enrich-owners command arguments
#[derive(Parser, Debug)]
pub struct OwnerArgs {
    /// Repository CSV written by `collect`
    #[arg(long)]
    pub repositories: PathBuf,

    /// Entity store CSV receiving the owner profiles
    #[arg(long)]
    pub output: PathBuf,

    /// Run target name; keys the checkpoint, ledger and lock
    #[arg(long, default_value = "owner-details")]
    pub target: String,

    /// Items per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// In-flight requests per batch (max: 32)
    #[arg(long, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Refetch owners whose profile is already in the output store
    #[arg(long, default_value_t = false)]
    pub refresh: bool,

    /// Ignore the checkpoint and start over (the old ledger is kept)
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    /// Only retry owners recorded in the failure ledger
    #[arg(long, default_value_t = false)]
    pub only_failed: bool,

    /// Fetch and extract without writing the entity store
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Cache TTL for successful responses, in hours
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL.as_secs() / 3600)]
    pub cache_ttl_hours: u64,

    /// Cache missing accounts (404) for this many hours
    #[arg(long)]
    pub negative_ttl_hours: Option<u64>,
}

impl OwnerArgs {
    /// Execute the enrich-owners command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let executor = cli.build_executor(shutdown)?;
        let target = cli.run_target(&self.target)?;

        let owners: Vec<OwnerItem> = read_owners(&self.repositories)?
            .into_iter()
            .map(OwnerItem::from_record)
            .collect();
        let distinct = owners.len();
        let population = if self.refresh {
            owners
        } else {
            let known = CsvEntityStore::load_latest(&self.output)?;
            unknown_owners(owners, &known)
        };

        let enricher = OwnerDetailsEnricher::new().with_cache_policy(CachePolicy::ReadWrite {
            ttl: hours(self.cache_ttl_hours),
            negative_ttl: self.negative_ttl_hours.map(hours),
        });
        let store = CsvEntityStore::open(&self.output)?;
        let mut engine = BatchEnrichmentEngine::new(executor, enricher, store, target);

        let options = RunOptions {
            batch_size: self.batch_size,
            resume_from_checkpoint: !self.fresh,
            only_failed: self.only_failed,
            failed_ledger: None,
            dry_run: self.dry_run,
            concurrency: self.concurrency,
        };
        info!(
            owners = distinct,
            pending = population.len(),
            refresh = self.refresh,
            "Starting owner enrichment"
        );

        let result = engine.run(population, &options).await;
        match (&result, cli.output_format) {
            (Ok(summary), OutputFormat::Json) => output_json(summary),
            (Ok(summary), OutputFormat::Human) => output_human(summary),
            (Err(e), _) => eprintln!("\nOwner enrichment failed!\nError: {e}"),
        }
        result.map(|_| ()).map_err(CliError::from)
    }
}
