//! Collect command implementation

use super::{hours, parse_instant, Cli, CliError, OutputFormat};
use crate::collect::{
    CollectionTracker, SweepRequest, SweepSummary, DEFAULT_FILL_RATIO, DEFAULT_MAX_DEPTH,
};
use crate::output::CsvRepositorySink;
use crate::request::CachePolicy;
use crate::resume::RunStatus;
use crate::shutdown::SharedShutdown;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Collect command arguments
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// Start of the creation range (YYYY-MM-DD or RFC3339, inclusive)
    #[arg(long)]
    pub start: String,

    /// End of the creation range (YYYY-MM-DD or RFC3339, exclusive)
    #[arg(long)]
    pub end: String,

    /// Extra search qualifiers, e.g. "language:rust stars:>10"
    #[arg(long, default_value = "")]
    pub qualifiers: String,

    /// Repository CSV receiving the results
    #[arg(long)]
    pub output: PathBuf,

    /// Run target name; keys the checkpoint and lock
    #[arg(long, default_value = "collect")]
    pub target: String,

    /// Ignore the checkpoint and plan the range again
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    /// Target share of the 1000-result cap per period
    #[arg(long, default_value_t = DEFAULT_FILL_RATIO)]
    pub fill_ratio: f64,

    /// Maximum subdivision depth
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: u32,

    /// Cache TTL for search pages, in hours
    #[arg(long, default_value_t = 1)]
    pub cache_ttl_hours: u64,
}

impl CollectArgs {
    /// Execute the collect command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let request = SweepRequest {
            start: parse_instant(&self.start)?,
            end: parse_instant(&self.end)?,
            qualifiers: self.qualifiers.clone(),
        };
        if request.start >= request.end {
            return Err(CliError::InvalidArgument(format!(
                "start {} must be before end {}",
                self.start, self.end
            )));
        }

        let executor = cli.build_executor(shutdown)?;
        let target = cli.run_target(&self.target)?;
        let tracker = CollectionTracker::new(executor, target)
            .with_fill_ratio(self.fill_ratio)
            .with_max_depth(self.max_depth)
            .with_cache_policy(CachePolicy::ReadWrite {
                ttl: hours(self.cache_ttl_hours),
                negative_ttl: None,
            });
        let mut sink = CsvRepositorySink::open(&self.output)?;

        info!(
            start = %request.start,
            end = %request.end,
            qualifiers = %request.qualifiers,
            "Starting collection sweep"
        );
        let result = tracker.sweep(&request, &mut sink, !self.fresh).await;
        match (&result, cli.output_format) {
            (Ok(summary), OutputFormat::Json) => output_json(summary),
            (Ok(summary), OutputFormat::Human) => {
                output_human(summary, sink.written(), sink.duplicates_skipped())
            }
            (Err(e), _) => eprintln!("\nCollection failed!\nError: {e}"),
        }
        result.map(|_| ()).map_err(CliError::from)
    }
}

fn output_json(summary: &SweepSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to encode summary: {e}"),
    }
}

fn output_human(summary: &SweepSummary, written: u64, duplicates: u64) {
    match summary.status {
        RunStatus::Completed => println!("\nCollection completed successfully!"),
        _ => println!("\nCollection interrupted."),
    }
    println!("Target: {}", summary.target);
    println!("Estimated total: {}", summary.estimated_total);
    println!(
        "Collected: {} this run, {} overall",
        summary.collected, summary.collected_total
    );
    println!("Written: {written} new, {duplicates} duplicates skipped");
    println!(
        "Periods: {} completed, {} subdivided, {} pending",
        summary.periods_completed, summary.periods_subdivided, summary.periods_pending
    );
    println!(
        "Requests: {} network, {} cached",
        summary.network_calls, summary.cache_hits
    );
    if let Some(next) = summary.next_period {
        println!("Resume will start at period {next}");
    }
}
