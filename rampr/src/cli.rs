use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// `10s`, `250ms`, `1m30s`; a bare number means seconds.
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}': {err} (expected e.g. 10s, 250ms, 1m)"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Live progress on stderr and a human-readable summary.
    HumanReadable,
    /// Emit JSON progress and summary lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "rampr",
    author,
    version,
    about = "Staged load generator with thresholds",
    long_about = "rampr drives virtual users through staged ramp profiles, aggregates latency percentiles and error rates while the run is going, and evaluates pass/fail thresholds at the end.\n\nA plan file (YAML) declares scenarios, weighted requests with checks, and thresholds. `${NAME}` placeholders in the plan are filled from the process environment and `--env KEY=VALUE`.",
    after_help = "Examples:\n  rampr run demos/performance.yaml --env BASE_URL=http://127.0.0.1:8080\n  rampr run demos/performance.yaml --vus 20 --duration 30s\n  rampr run demos/performance.yaml --output json --summary-export summary.json\n\nExit codes: 0 passed, 11 thresholds failed, 20 setup failed, 30 invalid input, 40 runtime fault."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test plan
    #[command(
        long_about = "Run a plan file and drive every scenario until its stages are over.\n\n`--vus`/`--duration` override every scenario; ramping scenarios then collapse into constant pools."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the plan (.yaml)
    pub plan: PathBuf,

    /// Number of virtual users for every scenario
    #[arg(long)]
    pub vus: Option<u64>,

    /// Duration for every scenario (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Hard cap on the whole run, graceful stops included
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Add/override variables substituted into the plan (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Also write the JSON summary to this file
    #[arg(long, value_name = "PATH")]
    pub summary_export: Option<PathBuf>,

    /// Log filter (e.g. warn, debug, rampr_core=debug)
    #[arg(long, env = "RAMPR_LOG", default_value = "warn")]
    pub log_level: String,
}
