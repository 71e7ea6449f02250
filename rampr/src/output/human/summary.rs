use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use rampr_core::rampr_metrics::{MetricState, SeriesSnapshot, TrendState};
use rampr_core::{RunResult, RunStatus};

use super::format::*;
use crate::output::Totals;

pub(crate) fn render(result: &RunResult) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    for s in &result.scenarios {
        let scoped = [("scenario", s.name.as_str())];

        writeln!(
            out,
            "scenario: {} ({}, max {} VUs)",
            s.name, s.executor, s.max_vus
        )
        .ok();
        writeln!(
            out,
            "  iterations: {} (interrupted {})",
            s.iterations, s.interrupted
        )
        .ok();
        writeln!(out, "  elapsed: {}", format_duration(s.elapsed)).ok();

        let requests = match result.metric_filtered("http_reqs", &scoped) {
            Some(MetricState::Counter { total }) => total,
            _ => 0,
        };
        let failed = match result.metric_filtered("http_req_failed", &scoped) {
            Some(MetricState::Rate { hits, .. }) => hits,
            _ => 0,
        };
        writeln!(out, "  requests: {requests} (failed {failed})").ok();

        match result.metric_filtered("http_req_duration", &scoped) {
            Some(MetricState::Trend(t)) if t.count() > 0 => {
                writeln!(out, "  latency = {}", trend_line(&t)).ok();
            }
            _ => out.push_str("  latency: n/a\n"),
        }
        out.push('\n');
    }

    let totals = Totals::from_result(result);
    out.push_str("totals\n");
    writeln!(
        out,
        "  requests: {} (failed {})",
        totals.requests, totals.failed_requests
    )
    .ok();
    writeln!(out, "  iterations: {}", totals.iterations).ok();
    writeln!(
        out,
        "  bytes: recv {} sent {}",
        format_bytes(totals.bytes_received),
        format_bytes(totals.bytes_sent)
    )
    .ok();
    let secs = result.elapsed.as_secs_f64().max(1e-9);
    writeln!(
        out,
        "  rates: rps={} iters/s={}",
        format_rate(totals.requests as f64 / secs),
        format_rate(totals.iterations as f64 / secs)
    )
    .ok();
    writeln!(
        out,
        "  checks: passed={} failed={}",
        totals.checks_passed, totals.checks_failed
    )
    .ok();
    writeln!(out, "  elapsed: {}", format_duration(result.elapsed)).ok();

    render_checks(&result.metrics, &mut out);
    render_metrics(&result.metrics, &mut out);
    render_thresholds(result, &mut out);

    if !result.faults.is_empty() {
        out.push_str("\nfaults\n");
        for f in &result.faults {
            writeln!(out, "  {f}").ok();
        }
    }

    out.push('\n');
    if let Some(reason) = result.aborted {
        writeln!(out, "aborted: {reason}").ok();
    }
    let status = match result.status {
        RunStatus::Passed => "PASSED",
        RunStatus::ThresholdsFailed => "THRESHOLDS FAILED",
        RunStatus::Faulted => "FAULTED",
    };
    writeln!(out, "status: {status}").ok();

    out
}

fn trend_line(t: &TrendState) -> String {
    format!(
        "p50={} p90={} p95={} p99={} avg={} max={} (n={})",
        format_ms_opt(t.percentile(50.0)),
        format_ms_opt(t.percentile(90.0)),
        format_ms_opt(t.percentile(95.0)),
        format_ms_opt(t.percentile(99.0)),
        format_ms_opt(t.avg()),
        format_ms_opt(t.max()),
        t.count()
    )
}

fn scenario_of(s: &SeriesSnapshot) -> &str {
    s.tags
        .iter()
        .find(|(k, _)| k == "scenario")
        .map_or("global", |(_, v)| v.as_str())
}

fn render_checks(series: &[SeriesSnapshot], out: &mut String) {
    // (scenario, check name, other tags) -> (pass, fail)
    let mut rows: BTreeMap<(String, String, String), (u64, u64)> = BTreeMap::new();

    for s in series.iter().filter(|s| s.name == "checks") {
        let MetricState::Rate { hits, total } = &s.state else {
            continue;
        };
        let Some((_, name)) = s.tags.iter().find(|(k, _)| k == "check") else {
            continue;
        };
        let key = (
            scenario_of(s).to_string(),
            name.clone(),
            format_tags_inline(&s.tags, &["scenario", "check"]),
        );
        let entry = rows.entry(key).or_default();
        entry.0 = entry.0.saturating_add(*hits);
        entry.1 = entry.1.saturating_add(total.saturating_sub(*hits));
    }

    if rows.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    let mut current: Option<&str> = None;
    for ((scenario, name, tags), (pass, fail)) in &rows {
        if current != Some(scenario.as_str()) {
            current = Some(scenario.as_str());
            writeln!(out, "scenario: {scenario}").ok();
        }
        let status = if *fail > 0 { "FAIL" } else { "OK" };
        writeln!(out, "    {name}{tags}: pass={pass} fail={fail} [{status}]").ok();
    }
}

fn render_metrics(series: &[SeriesSnapshot], out: &mut String) {
    let mut by_scenario: BTreeMap<&str, Vec<&SeriesSnapshot>> = BTreeMap::new();
    for s in series.iter().filter(|s| s.name != "checks") {
        by_scenario.entry(scenario_of(s)).or_default().push(s);
    }
    if by_scenario.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");
    for (scenario, mut rows) in by_scenario {
        writeln!(out, "scenario: {scenario}").ok();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));

        // `vus` ends at 0 once the pool is gone; print it next to its peak instead.
        let peaks: HashMap<String, i64> = rows
            .iter()
            .filter_map(|s| match (&s.name[..], &s.state) {
                ("vus_max", MetricState::Gauge { value }) => {
                    Some((format_tags_inline(&s.tags, &["scenario"]), *value))
                }
                _ => None,
            })
            .collect();

        for s in rows {
            let tags = format_tags_inline(&s.tags, &["scenario"]);
            if s.name == "vus_max" {
                continue;
            }
            if let ("vus", MetricState::Gauge { value }, Some(peak)) =
                (&s.name[..], &s.state, peaks.get(&tags))
            {
                writeln!(out, "    vus{tags} = end={value} peak={peak}").ok();
                continue;
            }

            match &s.state {
                MetricState::Counter { total } => {
                    writeln!(out, "    {}{tags} = {total}", s.name).ok();
                }
                MetricState::Gauge { value } => {
                    writeln!(out, "    {}{tags} = {value}", s.name).ok();
                }
                MetricState::Rate { hits, total } => {
                    let rate = s
                        .state
                        .rate()
                        .map(|r| format!(" rate={r:.3}"))
                        .unwrap_or_default();
                    writeln!(out, "    {}{tags} = hits={hits} total={total}{rate}", s.name).ok();
                }
                MetricState::Trend(t) => {
                    writeln!(out, "    {}{tags} = {}", s.name, trend_line(t)).ok();
                }
            };
        }
    }
}

fn render_thresholds(result: &RunResult, out: &mut String) {
    if result.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for t in &result.thresholds {
        let verdict = if t.passed { "ok" } else { "FAIL" };
        match t.observed {
            Some(v) => writeln!(
                out,
                "  {} {}: {verdict} (observed {v:.3})",
                t.metric, t.expression
            )
            .ok(),
            None => writeln!(out, "  {} {}: {verdict} (no data)", t.metric, t.expression).ok(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampr_core::rampr_metrics::{MetricHandle, MetricKind, Registry};
    use rampr_core::{RunFault, ScenarioExecutorKind, ScenarioResult, ThresholdOutcome};
    use std::time::Duration;

    fn record(
        reg: &Registry,
        name: &str,
        kind: MetricKind,
        extra: &[(&str, &str)],
        f: impl Fn(&MetricHandle),
    ) {
        let id = reg.register(name, kind);
        let mut tags = vec![("scenario", "default")];
        tags.extend_from_slice(extra);
        if let Some(h) = reg.handle(id, &reg.resolve_tags(&tags)) {
            f(&h);
        }
    }

    fn series() -> Vec<SeriesSnapshot> {
        let reg = Registry::default();
        record(&reg, "http_reqs", MetricKind::Counter, &[("status", "200")], |h| h.increment(10));
        record(&reg, "http_req_failed", MetricKind::Rate, &[], |h| {
            for i in 0..10 {
                h.add_rate(i < 2);
            }
        });
        record(&reg, "http_req_duration", MetricKind::Trend, &[], |h| {
            for v in 1..=10 {
                h.observe(f64::from(v));
            }
        });
        record(&reg, "data_received", MetricKind::Counter, &[], |h| h.increment(2048));
        record(&reg, "data_sent", MetricKind::Counter, &[], |h| h.increment(1024));
        record(&reg, "iterations", MetricKind::Counter, &[("status", "success")], |h| {
            h.increment(10)
        });
        record(&reg, "checks", MetricKind::Rate, &[("check", "status is 200")], |h| {
            for hit in [true, true, true, false] {
                h.add_rate(hit);
            }
        });
        record(&reg, "vus", MetricKind::Gauge, &[], |h| h.set_gauge(0));
        record(&reg, "vus_max", MetricKind::Gauge, &[], |h| h.set_gauge(10));
        reg.series()
    }

    fn result(status: RunStatus) -> RunResult {
        RunResult {
            scenarios: vec![ScenarioResult {
                name: "default".to_string(),
                executor: ScenarioExecutorKind::ConstantVus,
                max_vus: 10,
                elapsed: Duration::from_secs(10),
                iterations: 10,
                interrupted: 0,
            }],
            metrics: series(),
            thresholds: vec![
                ThresholdOutcome {
                    metric: "http_req_failed".to_string(),
                    expression: "rate<0.1".to_string(),
                    observed: Some(0.2),
                    passed: false,
                },
                ThresholdOutcome {
                    metric: "errors".to_string(),
                    expression: "rate<0.1".to_string(),
                    observed: None,
                    passed: false,
                },
            ],
            faults: Vec::new(),
            status,
            elapsed: Duration::from_secs(10),
            aborted: None,
        }
    }

    #[test]
    fn render_includes_scenario_and_totals() {
        let text = render(&result(RunStatus::ThresholdsFailed));
        assert!(text.contains("scenario: default (constant-vus, max 10 VUs)"));
        assert!(text.contains("requests: 10 (failed 2)"));
        assert!(text.contains("bytes: recv 2.00KiB sent 1.00KiB"));
        assert!(text.contains("rates: rps=1.0"));
        assert!(text.contains("checks: passed=3 failed=1"));
        assert!(text.contains("latency = p50="));
        assert!(text.contains("status: THRESHOLDS FAILED"));
    }

    #[test]
    fn render_checks_and_thresholds() {
        let text = render(&result(RunStatus::ThresholdsFailed));
        assert!(text.contains("status is 200: pass=3 fail=1 [FAIL]"));
        assert!(text.contains("http_req_failed rate<0.1: FAIL (observed 0.200)"));
        assert!(text.contains("errors rate<0.1: FAIL (no data)"));
    }

    #[test]
    fn render_metrics_combines_vus_end_and_peak() {
        let text = render(&result(RunStatus::Passed));
        assert!(text.contains("vus = end=0 peak=10"));
        assert!(!text.contains("vus_max"));
        assert!(text.contains("http_reqs{status=200} = 10"));
    }

    #[test]
    fn render_lists_faults_and_abort_reason() {
        let mut r = result(RunStatus::Faulted);
        r.faults.push(RunFault::Teardown("boom".to_string()));
        r.aborted = Some(rampr_core::AbortReason::External);
        let text = render(&r);
        assert!(text.contains("teardown failed: boom"));
        assert!(text.contains("aborted: external"));
        assert!(text.contains("status: FAULTED"));
    }
}
