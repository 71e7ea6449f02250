use rampr_metrics::{MetricState, Registry};

use crate::thresholds::{Threshold, ThresholdAgg, ThresholdExpr};

/// Result of one threshold expression.
#[derive(Debug, Clone)]
pub struct ThresholdOutcome {
    /// Selector as written, e.g. `http_req_duration{scenario:load}`.
    pub metric: String,
    pub expression: String,
    /// `None` when the metric had no samples or the aggregation does not apply to its kind.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// The value `agg` reads from `state`, if it is defined for that kind.
pub fn observed_value(agg: ThresholdAgg, state: &MetricState) -> Option<f64> {
    match (agg, state) {
        // A counter that never moved has no data, like an empty rate or trend.
        (ThresholdAgg::Count, MetricState::Counter { total }) => {
            (*total > 0).then_some(*total as f64)
        }
        (ThresholdAgg::Count, MetricState::Rate { total, .. }) => {
            (*total > 0).then_some(*total as f64)
        }
        (ThresholdAgg::Count, MetricState::Trend(t)) => {
            (t.count() > 0).then_some(t.count() as f64)
        }
        (ThresholdAgg::Rate, MetricState::Rate { .. }) => state.rate(),
        (
            ThresholdAgg::Avg | ThresholdAgg::Min | ThresholdAgg::Max,
            MetricState::Gauge { value },
        ) => Some(*value as f64),
        (ThresholdAgg::Avg, MetricState::Trend(t)) => t.avg(),
        (ThresholdAgg::Min, MetricState::Trend(t)) => t.min(),
        (ThresholdAgg::Max, MetricState::Trend(t)) => t.max(),
        (ThresholdAgg::Med, MetricState::Trend(t)) => t.percentile(50.0),
        (ThresholdAgg::P(p), MetricState::Trend(t)) => t.percentile(p),
        _ => None,
    }
}

/// Evaluates one expression against a snapshot. An absent snapshot or undefined value fails.
pub fn evaluate_expr(expr: &ThresholdExpr, state: Option<&MetricState>) -> (Option<f64>, bool) {
    let observed = state.and_then(|s| observed_value(expr.agg, s));
    let passed = observed.is_some_and(|v| expr.op.compare(v, expr.value));
    (observed, passed)
}

pub fn evaluate(thresholds: &[Threshold], metrics: &Registry) -> Vec<ThresholdOutcome> {
    thresholds
        .iter()
        .map(|t| {
            let filter: Vec<(&str, &str)> = t
                .selector
                .tags
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            let state = metrics.snapshot_filtered(&t.selector.name, &filter);
            let (observed, passed) = evaluate_expr(&t.expr, state.as_ref());
            ThresholdOutcome {
                metric: t.selector.to_string(),
                expression: t.source.clone(),
                observed,
                passed,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::ThresholdSet;
    use rampr_metrics::{MetricKind, Sample, TagSet};

    fn compile(metric: &str, exprs: &[&str]) -> Vec<Threshold> {
        ThresholdSet::new(metric, exprs.iter().copied())
            .compile()
            .unwrap_or_else(|e| panic!("{e}"))
    }

    fn record_rate(metrics: &Registry, name: &str, hits: usize, total: usize) {
        let id = metrics.register(name, MetricKind::Rate);
        for i in 0..total {
            let hit = if i < hits { 1.0 } else { 0.0 };
            metrics.record(&Sample::new(id, TagSet::default(), hit));
        }
    }

    #[test]
    fn rate_threshold_passes_at_five_percent_and_fails_at_fifteen() {
        let metrics = Registry::default();
        record_rate(&metrics, "low", 5, 100);
        record_rate(&metrics, "high", 15, 100);

        let low = evaluate(&compile("low", &["rate<0.1"]), &metrics);
        assert!(low[0].passed);
        assert_eq!(low[0].observed, Some(0.05));

        let high = evaluate(&compile("high", &["rate<0.1"]), &metrics);
        assert!(!high[0].passed);
        assert_eq!(high[0].observed, Some(0.15));
    }

    #[test]
    fn missing_or_empty_metrics_fail() {
        let metrics = Registry::default();
        metrics.register("registered_but_empty", MetricKind::Trend);

        for name in ["nope", "registered_but_empty"] {
            let out = evaluate(&compile(name, &["count>=0", "p(95)<1e9"]), &metrics);
            assert_eq!(out.len(), 2);
            assert!(out.iter().all(|o| !o.passed && o.observed.is_none()), "{name}");
        }
    }

    #[test]
    fn untouched_counter_has_no_count() {
        let metrics = Registry::default();
        let id = metrics.register("retries", MetricKind::Counter);
        metrics.record(&Sample::new(id, TagSet::default(), 0.0));

        let out = evaluate(&compile("retries", &["count<5"]), &metrics);
        assert!(!out[0].passed);
        assert_eq!(out[0].observed, None);

        metrics.record(&Sample::new(id, TagSet::default(), 3.0));
        let out = evaluate(&compile("retries", &["count<5"]), &metrics);
        assert!(out[0].passed);
        assert_eq!(out[0].observed, Some(3.0));
    }

    #[test]
    fn trend_aggregations_read_the_snapshot() {
        let metrics = Registry::default();
        let id = metrics.register("http_req_duration", MetricKind::Trend);
        for v in 1..=100 {
            metrics.record(&Sample::new(id, TagSet::default(), f64::from(v)));
        }

        let out = evaluate(
            &compile(
                "http_req_duration",
                &["p(95)<96", "p(99)<1000", "avg==50.5", "min>=1", "max<=100", "med<51", "count==100"],
            ),
            &metrics,
        );
        for o in &out {
            assert!(o.passed, "{} observed {:?}", o.expression, o.observed);
        }
    }

    #[test]
    fn kind_mismatches_fail() {
        let metrics = Registry::default();
        record_rate(&metrics, "errors", 0, 10);
        let out = evaluate(&compile("errors", &["p(95)<1", "avg<1"]), &metrics);
        assert!(out.iter().all(|o| !o.passed));
    }

    #[test]
    fn tag_selectors_filter_series() {
        let metrics = Registry::default();
        let id = metrics.register("http_req_failed", MetricKind::Rate);
        let load = metrics.resolve_tags(&[("scenario", "load_test")]);
        let stress = metrics.resolve_tags(&[("scenario", "stress_test")]);
        for i in 0..10 {
            metrics.record(&Sample::new(id, load.clone(), 0.0));
            metrics.record(&Sample::new(id, stress.clone(), if i < 5 { 1.0 } else { 0.0 }));
        }

        let out = evaluate(
            &compile("http_req_failed{scenario:load_test}", &["rate<0.1"]),
            &metrics,
        );
        assert!(out[0].passed);
        assert_eq!(out[0].metric, "http_req_failed{scenario:load_test}");

        let out = evaluate(
            &compile("http_req_failed{scenario:stress_test}", &["rate<0.1"]),
            &metrics,
        );
        assert_eq!(out[0].observed, Some(0.5));
        assert!(!out[0].passed);
    }
}
