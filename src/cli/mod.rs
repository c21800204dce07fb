//! CLI command implementations

pub mod collect;
pub mod enrich;
pub mod error;
pub mod geocode;
pub mod owners;
pub mod status;

pub use collect::CollectArgs;
pub use enrich::EnrichArgs;
pub use error::CliError;
pub use geocode::GeocodeArgs;
pub use owners::OwnerArgs;
pub use status::StatusArgs;

use crate::cache::ResponseCache;
use crate::credentials::CredentialPool;
use crate::request::{GitHubTransport, RequestExecutor, RetryPolicy};
use crate::resume::RunTarget;
use crate::shutdown::SharedShutdown;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Maximum allowed in-batch concurrency
const MAX_CONCURRENCY: usize = 32;

/// GitHub Ingest CLI
#[derive(Parser, Debug)]
#[command(name = "github-ingest")]
#[command(about = "Resilient GitHub repository metadata ingestion", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// API tokens, comma-separated
    #[arg(long, global = true, env = "GITHUB_API_TOKENS", value_delimiter = ',', hide_env_values = true)]
    pub tokens: Vec<String>,

    /// Directory for checkpoints, failure ledgers and run locks
    #[arg(long, global = true, env = "GITHUB_INGEST_STATE_DIR", default_value = ".ingest-state")]
    pub state_dir: PathBuf,

    /// Directory for the response cache
    #[arg(long, global = true, env = "GITHUB_INGEST_CACHE_DIR", default_value = ".ingest-cache")]
    pub cache_dir: PathBuf,

    /// Disable the response cache
    #[arg(long, global = true, default_value_t = false)]
    pub no_cache: bool,

    /// Maximum number of retries for transient failures (range: 1-20)
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: u32,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach repository statistics to a population of repositories
    Enrich(EnrichArgs),

    /// Fetch user and organisation profiles of repository owners
    EnrichOwners(OwnerArgs),

    /// Sweep repository search over a creation-date range
    Collect(CollectArgs),

    /// Resolve free-text locations to countries
    Geocode(GeocodeArgs),

    /// Show checkpoint state of run targets
    Status(StatusArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

impl Cli {
    /// Execute the selected command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<(), CliError> {
        match &self.command {
            Commands::Enrich(args) => args.execute(self, shutdown).await,
            Commands::EnrichOwners(args) => args.execute(self, shutdown).await,
            Commands::Collect(args) => args.execute(self, shutdown).await,
            Commands::Geocode(args) => args.execute(self, shutdown).await,
            Commands::Status(args) => args.execute(self),
        }
    }

    /// Tokens from `--tokens`/`GITHUB_API_TOKENS`, else `GITHUB_API_TOKEN`
    pub fn resolve_tokens(&self) -> Vec<String> {
        let tokens: Vec<String> = self
            .tokens
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !tokens.is_empty() {
            return tokens;
        }
        std::env::var("GITHUB_API_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .into_iter()
            .collect()
    }

    /// Response cache, unless disabled
    pub fn open_cache(&self) -> Result<Option<ResponseCache>, CliError> {
        if self.no_cache {
            return Ok(None);
        }
        Ok(Some(ResponseCache::open(&self.cache_dir)?))
    }

    /// Run target `name` under the state directory
    pub fn run_target(&self, name: &str) -> Result<RunTarget, CliError> {
        Ok(RunTarget::new(&self.state_dir, name)?)
    }

    /// Executor over the GitHub API with every configured credential
    pub fn build_executor(&self, shutdown: SharedShutdown) -> Result<Arc<RequestExecutor>, CliError> {
        let tokens = self.resolve_tokens();
        if tokens.is_empty() {
            return Err(CliError::ConfigurationError(
                "no API tokens: pass --tokens or set GITHUB_API_TOKENS / GITHUB_API_TOKEN".into(),
            ));
        }
        info!(credentials = tokens.len(), "Configured API credentials");

        let transport = GitHubTransport::new()
            .map_err(|e| CliError::ConfigurationError(e.to_string()))?;
        let pool = Arc::new(CredentialPool::new(tokens));
        let mut executor = RequestExecutor::new(Arc::new(transport), pool)
            .with_retry_policy(RetryPolicy::default().with_max_retries(self.max_retries))
            .with_shutdown(shutdown);
        if let Some(cache) = self.open_cache()? {
            executor = executor.with_cache(cache);
        }
        Ok(Arc::new(executor))
    }
}

/// Parse and validate a concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!("concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"));
    }
    Ok(value)
}

/// Parse an instant from YYYY-MM-DD (midnight UTC) or RFC3339.
///
/// RFC3339 without an offset is taken as UTC.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>, CliError> {
    let input = input.trim();
    let parsed = DateTime::parse_from_rfc3339(input)
        .or_else(|_| DateTime::parse_from_rfc3339(&format!("{input}Z")))
        .map(|dt| dt.with_timezone(&Utc));
    let instant = match parsed {
        Ok(dt) => dt,
        Err(_) => {
            let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .map_err(|e| CliError::InvalidArgument(format!("Invalid date '{input}': {e}")))?;
            date.and_hms_opt(0, 0, 0)
                .ok_or_else(|| CliError::InvalidArgument(format!("Invalid date '{input}'")))?
                .and_utc()
        }
    };
    // Search qualifiers have one-second resolution.
    if instant.timestamp_subsec_nanos() != 0 {
        return Err(CliError::InvalidArgument(format!(
            "Invalid instant '{input}': fractional seconds are not supported"
        )));
    }
    Ok(instant)
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(60 * 60))
}
