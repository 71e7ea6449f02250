use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use rampr_core::rampr_metrics::{MetricState, SeriesSnapshot};
use rampr_core::{ProgressFn, ProgressUpdate, RunResult, Scenario};

use super::{OutputFormatter, Totals};

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _scenarios: &[Scenario<()>]) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()> {
        let line = build_summary_line(result);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub scenarios: Vec<JsonScenarioProgress>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenarioProgress {
    pub scenario: String,
    pub executor: String,
    pub active_vus: u64,
    pub target_vus: u64,
    pub iterations: u64,
    pub done: bool,
    pub stage: Option<JsonStageProgress>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonStageProgress {
    pub stage: usize,
    pub stages: usize,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
    pub stage_remaining_secs: f64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        scenarios: u
            .scenarios
            .iter()
            .map(|s| JsonScenarioProgress {
                scenario: s.name.clone(),
                executor: s.executor.to_string(),
                active_vus: s.active_vus,
                target_vus: s.target_vus,
                iterations: s.iterations,
                done: s.done,
                stage: s.stage.as_ref().map(|st| JsonStageProgress {
                    stage: st.stage,
                    stages: st.stages,
                    start_target: st.start_target,
                    end_target: st.end_target,
                    current_target: st.current_target,
                    stage_remaining_secs: st.stage_remaining.as_secs_f64(),
                }),
            })
            .collect(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub status: String,
    pub elapsed_secs: f64,
    pub aborted: Option<String>,
    pub scenarios: Vec<JsonScenarioSummary>,
    pub totals: JsonTotals,
    pub thresholds: Vec<JsonThreshold>,
    pub faults: Vec<String>,
    pub metrics: Vec<JsonMetricSeries>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenarioSummary {
    pub scenario: String,
    pub executor: String,
    pub max_vus: u64,
    pub elapsed_secs: f64,
    pub iterations_total: u64,
    pub interrupted_total: u64,
}

#[derive(Debug, Serialize, Default)]
pub(crate) struct JsonTotals {
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    pub iterations_total: u64,
    pub checks_passed_total: u64,
    pub checks_failed_total: u64,
}

impl From<Totals> for JsonTotals {
    fn from(t: Totals) -> Self {
        Self {
            requests_total: t.requests,
            failed_requests_total: t.failed_requests,
            bytes_received_total: t.bytes_received,
            bytes_sent_total: t.bytes_sent,
            iterations_total: t.iterations,
            checks_passed_total: t.checks_passed,
            checks_failed_total: t.checks_failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonMetricSeries {
    pub name: String,
    pub kind: String,
    pub tags: BTreeMap<String, String>,
    pub values: JsonMetricValues,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum JsonMetricValues {
    Counter {
        count: u64,
    },
    Gauge {
        value: i64,
    },
    Rate {
        hits: u64,
        total: u64,
        rate: Option<f64>,
    },
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

impl From<&MetricState> for JsonMetricValues {
    fn from(state: &MetricState) -> Self {
        match state {
            MetricState::Counter { total } => Self::Counter { count: *total },
            MetricState::Gauge { value } => Self::Gauge { value: *value },
            MetricState::Rate { hits, total } => Self::Rate {
                hits: *hits,
                total: *total,
                rate: state.rate(),
            },
            MetricState::Trend(t) => Self::Trend {
                count: t.count(),
                min: t.min(),
                max: t.max(),
                avg: t.avg(),
                med: t.percentile(50.0),
                p90: t.percentile(90.0),
                p95: t.percentile(95.0),
                p99: t.percentile(99.0),
            },
        }
    }
}

fn metric_series(s: &SeriesSnapshot) -> JsonMetricSeries {
    JsonMetricSeries {
        name: s.name.clone(),
        kind: s.kind.to_string(),
        tags: s.tags.iter().cloned().collect(),
        values: JsonMetricValues::from(&s.state),
    }
}

pub(crate) fn build_summary_line(result: &RunResult) -> JsonSummaryLine {
    let scenarios = result
        .scenarios
        .iter()
        .map(|s| JsonScenarioSummary {
            scenario: s.name.clone(),
            executor: s.executor.to_string(),
            max_vus: s.max_vus,
            elapsed_secs: s.elapsed.as_secs_f64(),
            iterations_total: s.iterations,
            interrupted_total: s.interrupted,
        })
        .collect();

    let thresholds = result
        .thresholds
        .iter()
        .map(|t| JsonThreshold {
            metric: t.metric.clone(),
            expression: t.expression.clone(),
            observed: t.observed,
            passed: t.passed,
        })
        .collect();

    let mut metrics: Vec<JsonMetricSeries> = result.metrics.iter().map(metric_series).collect();
    metrics.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));

    JsonSummaryLine {
        kind: "summary",
        status: result.status.to_string(),
        elapsed_secs: result.elapsed.as_secs_f64(),
        aborted: result.aborted.map(|r| r.to_string()),
        scenarios,
        totals: Totals::from_result(result).into(),
        thresholds,
        faults: result.faults.iter().map(ToString::to_string).collect(),
        metrics,
    }
}

/// Pretty-printed summary for `--summary-export`.
pub(crate) async fn export_summary(path: &Path, result: &RunResult) -> anyhow::Result<()> {
    use anyhow::Context as _;

    let line = build_summary_line(result);
    let mut bytes = serde_json::to_vec_pretty(&line).context("failed to encode summary")?;
    bytes.push(b'\n');
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write summary to {}", path.display()))
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
