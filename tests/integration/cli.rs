//! Integration tests for the command-line surface

use assert_cmd::Command;
use clap::Parser;
use github_ingest::cli::{Cli, Commands, OutputFormat};
use github_ingest::resume::{RunKind, RunState, RunTarget};
use serde_json::Value;
use tempfile::TempDir;

fn github_ingest(state_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("github-ingest").unwrap();
    cmd.env_remove("GITHUB_API_TOKENS")
        .env_remove("GITHUB_API_TOKEN")
        .env_remove("GITHUB_INGEST_CACHE_DIR")
        .env("GITHUB_INGEST_STATE_DIR", state_dir.path());
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = github_ingest(&dir).arg("--help").assert().success().get_output().clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["enrich", "enrich-owners", "collect", "geocode", "status"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn test_status_with_no_targets() {
    let dir = TempDir::new().unwrap();
    let output = github_ingest(&dir).arg("status").assert().success().get_output().clone();
    assert!(String::from_utf8_lossy(&output.stdout).contains("No run targets"));
}

#[test]
fn test_status_reports_saved_checkpoint_as_json() {
    let dir = TempDir::new().unwrap();
    let target = RunTarget::new(dir.path(), "repo-stats").unwrap();
    RunState::new(target.name(), RunKind::Enrich)
        .save(&target.checkpoint_path())
        .unwrap();

    let output = github_ingest(&dir)
        .args(["--output-format", "json", "status"])
        .assert()
        .success()
        .get_output()
        .clone();
    let reports: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports[0]["target"], "repo-stats");
    assert_eq!(reports[0]["status"], "not_started");
    assert_eq!(reports[0]["ledger_failures"], 0);
}

#[test]
fn test_enrich_without_tokens_fails() {
    let dir = TempDir::new().unwrap();
    let population = dir.path().join("population.csv");
    std::fs::write(&population, "id,owner,name\n1,rust-lang,rust\n").unwrap();

    github_ingest(&dir)
        .args(["--no-cache", "enrich", "--population"])
        .arg(&population)
        .arg("--output")
        .arg(dir.path().join("stats.csv"))
        .assert()
        .failure();
    assert!(!dir.path().join("stats.csv").exists());
}

#[test]
fn test_collect_rejects_backwards_range() {
    let dir = TempDir::new().unwrap();
    github_ingest(&dir)
        .args([
            "--tokens",
            "unused",
            "collect",
            "--start",
            "2021-02-01",
            "--end",
            "2021-01-01",
            "--output",
        ])
        .arg(dir.path().join("repos.csv"))
        .assert()
        .failure();
}

#[test]
fn test_failed_ledger_requires_only_failed() {
    let parsed = Cli::try_parse_from([
        "github-ingest",
        "enrich",
        "--population",
        "p.csv",
        "--output",
        "o.csv",
        "--failed-ledger",
        "old.jsonl",
    ]);
    assert!(parsed.is_err());
}

#[test]
fn test_geocode_takes_one_location_source() {
    let parse = |args: &[&str]| {
        let mut argv = vec!["github-ingest", "geocode", "--output", "geo.csv"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
    };
    assert!(parse(&[]).is_err());
    assert!(parse(&["--input", "loc.csv", "--owners", "owners.csv"]).is_err());
    assert!(parse(&["--owners", "owners.csv"]).is_ok());
    assert!(parse(&["--input", "loc.csv"]).is_ok());
}

#[test]
fn test_enrich_owners_defaults() {
    let cli = Cli::try_parse_from([
        "github-ingest",
        "enrich-owners",
        "--repositories",
        "repos.csv",
        "--output",
        "owners.csv",
    ])
    .unwrap();
    match cli.command {
        Commands::EnrichOwners(args) => {
            assert_eq!(args.target, "owner-details");
            assert!(!args.refresh);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "github-ingest",
        "status",
        "--output-format",
        "json",
        "--max-retries",
        "7",
    ])
    .unwrap();
    assert_eq!(cli.output_format, OutputFormat::Json);
    assert_eq!(cli.max_retries, 7);
    assert!(matches!(cli.command, Commands::Status(_)));
}

#[test]
fn test_max_retries_is_bounded() {
    assert!(Cli::try_parse_from(["github-ingest", "--max-retries", "0", "status"]).is_err());
    assert!(Cli::try_parse_from(["github-ingest", "--max-retries", "21", "status"]).is_err());
}
