//! Status command implementation

use super::{Cli, CliError, OutputFormat};
use crate::resume::{CheckpointType, FailureLedger, RunState, RunTarget};
use clap::Parser;
use serde_json::json;

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// Status command arguments
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Only show this run target
    #[arg(long)]
    pub target: Option<String>,
}

impl StatusArgs {
    /// Execute the status command
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let names = match &self.target {
            Some(name) => vec![name.clone()],
            None => list_targets(cli)?,
        };

        let mut reports = Vec::new();
        for name in names {
            let target = cli.run_target(&name)?;
            reports.push(describe(&target)?);
        }

        match cli.output_format {
            OutputFormat::Json => match serde_json::to_string_pretty(&reports) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Failed to encode status: {e}"),
            },
            OutputFormat::Human => {
                if reports.is_empty() {
                    println!("No run targets under {}", cli.state_dir.display());
                }
                for report in &reports {
                    print_human(report);
                }
            }
        }
        Ok(())
    }
}

fn list_targets(cli: &Cli) -> Result<Vec<String>, CliError> {
    let entries = match std::fs::read_dir(&cli.state_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(CliError::InvalidArgument(format!(
                "Failed to read state directory {}: {e}",
                cli.state_dir.display()
            )))
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(CHECKPOINT_SUFFIX))
                .map(str::to_string)
        })
        .collect();
    names.sort();
    Ok(names)
}

fn describe(target: &RunTarget) -> Result<serde_json::Value, CliError> {
    let ledger = FailureLedger::new(target.ledger_path());
    let ledger_failures = ledger.failed_ids()?.len();

    let Some(state) = RunState::load_optional(&target.checkpoint_path())? else {
        return Ok(json!({
            "target": target.name(),
            "status": "not_started",
            "ledger_path": ledger.path().display().to_string(),
            "ledger_failures": ledger_failures,
        }));
    };

    let progress = state.checkpoint().map(|checkpoint| match checkpoint.checkpoint_type() {
        CheckpointType::Batch {
            last_completed,
            total_batches,
            batch_size,
            ..
        } => json!({
            "kind": "batch",
            "last_completed": last_completed,
            "total_batches": total_batches,
            "batch_size": batch_size,
            "processed": checkpoint.processed(),
            "failed": checkpoint.failed(),
        }),
        CheckpointType::Period {
            qualifiers,
            pending,
            completed_through,
            estimated_total,
            ..
        } => json!({
            "kind": "period",
            "qualifiers": qualifiers,
            "pending_periods": pending.len(),
            "next_period": pending.first().map(|p| p.to_string()),
            "completed_through": completed_through,
            "estimated_total": estimated_total,
            "collected": checkpoint.processed(),
        }),
    });

    Ok(json!({
        "target": target.name(),
        "kind": state.kind(),
        "status": state.status(),
        "updated_at": state.updated_at(),
        "runs_started": state.metadata().runs_started(),
        "last_error": state.metadata().last_error(),
        "progress": progress,
        "ledger_path": ledger.path().display().to_string(),
        "ledger_failures": ledger_failures,
    }))
}

fn print_human(report: &serde_json::Value) {
    println!("\nTarget: {}", report["target"].as_str().unwrap_or_default());
    println!("Status: {}", report["status"].as_str().unwrap_or_default());
    if let Some(error) = report["last_error"].as_str() {
        println!("Last error: {error}");
    }
    let progress = &report["progress"];
    match progress["kind"].as_str() {
        Some("batch") => println!(
            "Batches: {} of {} done ({} processed, {} failed)",
            progress["last_completed"].as_u64().map(|n| n + 1).unwrap_or(0),
            progress["total_batches"],
            progress["processed"],
            progress["failed"]
        ),
        Some("period") => println!(
            "Periods pending: {} (collected {} of ~{})",
            progress["pending_periods"], progress["collected"], progress["estimated_total"]
        ),
        _ => {}
    }
    println!(
        "Failure ledger: {} ({} ids)",
        report["ledger_path"].as_str().unwrap_or_default(),
        report["ledger_failures"]
    );
}
