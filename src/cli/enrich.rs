//! Enrich command implementation

use super::{hours, parse_concurrency, Cli, CliError, OutputFormat};
use crate::enrich::{BatchEnrichmentEngine, RepoStatsEnricher, RunOptions, RunSummary, WorkItem};
use crate::output::{read_population, CsvEntityStore};
use crate::request::config::{DEFAULT_BATCH_SIZE, DEFAULT_CACHE_TTL};
use crate::request::CachePolicy;
use crate::resume::RunStatus;
use crate::shutdown::SharedShutdown;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Enrich command arguments
#[derive(Parser, Debug)]
pub struct EnrichArgs {
    /// Population CSV (`id,owner,name[,missing]`)
    #[arg(long)]
    pub population: PathBuf,

    /// Entity store CSV receiving the derived fields
    #[arg(long)]
    pub output: PathBuf,

    /// Run target name; keys the checkpoint, ledger and lock
    #[arg(long, default_value = "repo-stats")]
    pub target: String,

    /// Items per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// In-flight requests per batch (max: 32)
    #[arg(long, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Ignore the checkpoint and start over (the old ledger is kept)
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    /// Only retry items recorded in the failure ledger
    #[arg(long, default_value_t = false)]
    pub only_failed: bool,

    /// Ledger to retry from instead of the target's own
    #[arg(long, requires = "only_failed")]
    pub failed_ledger: Option<PathBuf>,

    /// Fetch and extract without writing the entity store
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Cache TTL for successful responses, in hours
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL.as_secs() / 3600)]
    pub cache_ttl_hours: u64,

    /// Cache permanent client errors (e.g. deleted repositories) for this many hours
    #[arg(long)]
    pub negative_ttl_hours: Option<u64>,
}

impl EnrichArgs {
    /// Execute the enrich command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let executor = cli.build_executor(shutdown)?;
        let target = cli.run_target(&self.target)?;

        let population = read_population(&self.population)?
            .into_iter()
            .map(WorkItem::from_record)
            .collect::<Result<Vec<_>, _>>()?;

        let enricher = RepoStatsEnricher::new().with_cache_policy(CachePolicy::ReadWrite {
            ttl: hours(self.cache_ttl_hours),
            negative_ttl: self.negative_ttl_hours.map(hours),
        });
        let store = CsvEntityStore::open(&self.output)?;
        let mut engine = BatchEnrichmentEngine::new(executor, enricher, store, target);

        let options = RunOptions {
            batch_size: self.batch_size,
            resume_from_checkpoint: !self.fresh,
            only_failed: self.only_failed,
            failed_ledger: self.failed_ledger.clone(),
            dry_run: self.dry_run,
            concurrency: self.concurrency,
        };
        info!(
            population = population.len(),
            batch_size = options.batch_size,
            dry_run = options.dry_run,
            "Starting enrichment"
        );

        let result = engine.run(population, &options).await;
        match (&result, cli.output_format) {
            (Ok(summary), OutputFormat::Json) => output_json(summary),
            (Ok(summary), OutputFormat::Human) => output_human(summary),
            (Err(e), _) => eprintln!("\nEnrichment failed!\nError: {e}"),
        }
        result.map(|_| ()).map_err(CliError::from)
    }
}

pub(super) fn output_json(summary: &RunSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to encode summary: {e}"),
    }
}

pub(super) fn output_human(summary: &RunSummary) {
    match summary.status {
        RunStatus::Completed => println!("\nEnrichment completed successfully!"),
        _ => println!("\nEnrichment interrupted."),
    }
    if summary.dry_run {
        println!("Dry run: entity store left untouched");
    }
    println!("Target: {}", summary.target);
    println!("Items: {}", summary.items_total);
    println!("Succeeded: {}", summary.succeeded);
    println!("Failed: {}", summary.failed);
    println!("Skipped (checkpoint): {}", summary.skipped);
    println!(
        "Batches: {} processed, {} skipped, {} total",
        summary.batches_processed, summary.batches_skipped, summary.batches_total
    );
    println!(
        "Requests: {} network, {} cached",
        summary.network_calls, summary.cache_hits
    );
    println!("Failure ledger: {}", summary.ledger_path.display());
    if let Some(next) = summary.next_batch {
        println!("Resume will start at batch {next}");
    }
}
