use std::time::Duration;

use rampr_metrics::{MetricHandle, MetricId, MetricKind, Registry};

use crate::metrics_context::MetricsContext;

/// Name of the check recorded when an iteration itself fails.
pub const ITERATION_ERROR_CHECK: &str = "iteration_error";

#[derive(Debug, Clone, Copy)]
pub struct IterationMetricIds {
    pub iterations: MetricId,
    /// Milliseconds.
    pub iteration_duration: MetricId,
    pub interrupted: MetricId,
    pub checks: MetricId,
    pub vus: MetricId,
    pub vus_max: MetricId,
}

impl IterationMetricIds {
    pub fn register(metrics: &Registry) -> Self {
        Self {
            iterations: metrics.register("iterations", MetricKind::Counter),
            iteration_duration: metrics.register("iteration_duration", MetricKind::Trend),
            interrupted: metrics.register("interrupted_iterations", MetricKind::Counter),
            checks: metrics.register("checks", MetricKind::Rate),
            vus: metrics.register("vus", MetricKind::Gauge),
            vus_max: metrics.register("vus_max", MetricKind::Gauge),
        }
    }

    pub fn record_iteration(
        &self,
        metrics: &Registry,
        ctx: &MetricsContext,
        success: bool,
        duration: Duration,
    ) {
        let status = if success { "success" } else { "failure" };
        let tags = ctx.tags_with(metrics, &[("status", status)]);

        if let Some(h) = metrics.handle(self.iterations, &tags) {
            h.increment(1);
        }
        if let Some(h) = metrics.handle(self.iteration_duration, &tags) {
            h.observe(duration.as_secs_f64() * 1_000.0);
        }
    }

    pub fn record_check(
        &self,
        metrics: &Registry,
        ctx: &MetricsContext,
        name: &str,
        passed: bool,
        extra_tags: &[(&str, &str)],
    ) {
        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(extra_tags.len() + 1);
        pairs.push(("check", name));
        pairs.extend_from_slice(extra_tags);

        let tags = ctx.tags_with(metrics, &pairs);
        if let Some(h) = metrics.handle(self.checks, &tags) {
            h.add_rate(passed);
        }
    }

    pub fn record_interrupted(&self, metrics: &Registry, ctx: &MetricsContext, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(h) = metrics.handle(self.interrupted, ctx.base_tags()) {
            h.increment(count);
        }
    }

    /// Live VU gauge handles for one scenario.
    pub fn vu_gauges(
        &self,
        metrics: &Registry,
        ctx: &MetricsContext,
    ) -> Option<(MetricHandle, MetricHandle)> {
        let active = metrics.handle(self.vus, ctx.base_tags())?;
        let peak = metrics.handle(self.vus_max, ctx.base_tags())?;
        Some((active, peak))
    }
}
