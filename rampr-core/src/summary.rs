use std::time::Duration;

use rampr_metrics::{MetricState, SeriesSnapshot};

use crate::config::ScenarioExecutorKind;
use crate::thresholds_eval::ThresholdOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Passed,
    ThresholdsFailed,
    Faulted,
}

/// Something went wrong that is not a plain threshold violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunFault {
    #[error("executor for scenario `{scenario}` crashed: {message}")]
    ExecutorPanic { scenario: String, message: String },

    #[error("scenario `{scenario}` aborted the run on a transport error: {error}")]
    TransportAbort { scenario: String, error: String },

    #[error("teardown failed: {0}")]
    Teardown(String),
}

/// Why a run stopped before its scenarios finished on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AbortReason {
    External,
    Timeout,
    Threshold,
    TransportError,
}

#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: String,
    pub executor: ScenarioExecutorKind,
    pub max_vus: u64,
    pub elapsed: Duration,
    pub iterations: u64,
    /// Iterations still running after the graceful stop expired.
    pub interrupted: u64,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub scenarios: Vec<ScenarioResult>,
    /// Final copy of every series, taken after all VUs were joined.
    pub metrics: Vec<SeriesSnapshot>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub faults: Vec<RunFault>,
    pub status: RunStatus,
    pub elapsed: Duration,
    pub aborted: Option<AbortReason>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    /// Every series of `name` folded together.
    pub fn metric(&self, name: &str) -> Option<MetricState> {
        self.metric_filtered(name, &[])
    }

    pub fn metric_filtered(&self, name: &str, filter: &[(&str, &str)]) -> Option<MetricState> {
        let mut out: Option<MetricState> = None;
        for s in self.metrics.iter().filter(|s| s.name == name) {
            let matches = filter
                .iter()
                .all(|(k, v)| s.tags.iter().any(|(sk, sv)| sk == k && sv == v));
            if matches {
                out.get_or_insert_with(|| MetricState::empty(s.kind))
                    .merge(&s.state);
            }
        }
        out
    }

    /// Total of a counter metric, `0` when it never fired.
    pub fn counter(&self, name: &str) -> u64 {
        match self.metric(name) {
            Some(MetricState::Counter { total }) => total,
            _ => 0,
        }
    }
}

pub(crate) fn run_status(thresholds: &[ThresholdOutcome], faults: &[RunFault]) -> RunStatus {
    if !faults.is_empty() {
        RunStatus::Faulted
    } else if thresholds.iter().any(|t| !t.passed) {
        RunStatus::ThresholdsFailed
    } else {
        RunStatus::Passed
    }
}
