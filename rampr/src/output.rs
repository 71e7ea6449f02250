use crate::cli::OutputFormat;
use std::path::Path;

use rampr_core::{ProgressFn, RunResult, Scenario};

mod human;
pub(crate) mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan_path: &Path, scenarios: &[Scenario<()>]);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}

/// Run-wide figures both formatters print.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Totals {
    pub requests: u64,
    pub failed_requests: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub iterations: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
}

impl Totals {
    pub(crate) fn from_result(result: &RunResult) -> Self {
        let (failed_requests, _) = rate_counts(result, "http_req_failed");
        let (checks_passed, checks_total) = rate_counts(result, "checks");
        Self {
            requests: result.counter("http_reqs"),
            failed_requests,
            bytes_received: result.counter("data_received"),
            bytes_sent: result.counter("data_sent"),
            iterations: result.counter("iterations"),
            checks_passed,
            checks_failed: checks_total.saturating_sub(checks_passed),
        }
    }
}

/// `(hits, total)` of a rate metric across all of its series.
fn rate_counts(result: &RunResult, name: &str) -> (u64, u64) {
    match result.metric(name) {
        Some(rampr_core::rampr_metrics::MetricState::Rate { hits, total }) => (hits, total),
        _ => (0, 0),
    }
}
