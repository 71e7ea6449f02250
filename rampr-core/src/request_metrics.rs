use std::time::Duration;

use rampr_http::{HttpResponse, HttpTransportErrorKind};
use rampr_metrics::{MetricId, MetricKind, Registry};

use crate::metrics_context::MetricsContext;

#[derive(Debug, Clone, Copy)]
pub struct RequestMetricIds {
    pub reqs: MetricId,
    /// Milliseconds, whole exchange.
    pub duration: MetricId,
    pub waiting: MetricId,
    pub receiving: MetricId,
    pub failed: MetricId,
    pub data_sent: MetricId,
    pub data_received: MetricId,
}

/// Request identity used for tagging. `name` should be low-cardinality (URL without query).
#[derive(Debug, Clone, Copy)]
pub struct RequestLabel<'a> {
    pub method: &'a str,
    pub name: &'a str,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

impl RequestMetricIds {
    pub fn register(metrics: &Registry) -> Self {
        Self {
            reqs: metrics.register("http_reqs", MetricKind::Counter),
            duration: metrics.register("http_req_duration", MetricKind::Trend),
            waiting: metrics.register("http_req_waiting", MetricKind::Trend),
            receiving: metrics.register("http_req_receiving", MetricKind::Trend),
            failed: metrics.register("http_req_failed", MetricKind::Rate),
            data_sent: metrics.register("data_sent", MetricKind::Counter),
            data_received: metrics.register("data_received", MetricKind::Counter),
        }
    }

    pub fn record_response(
        &self,
        metrics: &Registry,
        ctx: &MetricsContext,
        label: RequestLabel<'_>,
        res: &HttpResponse,
    ) {
        let status = res.status.to_string();
        let tags = ctx.tags_with(
            metrics,
            &[
                ("method", label.method),
                ("status", status.as_str()),
                ("name", label.name),
            ],
        );

        let handle = |id| metrics.handle(id, &tags);
        if let Some(h) = handle(self.reqs) {
            h.increment(1);
        }
        if let Some(h) = handle(self.duration) {
            h.observe(millis(res.timings.duration));
        }
        if let Some(h) = handle(self.waiting) {
            h.observe(millis(res.timings.waiting));
        }
        if let Some(h) = handle(self.receiving) {
            h.observe(millis(res.timings.receiving));
        }
        if let Some(h) = handle(self.failed) {
            h.add_rate(!res.is_success());
        }

        let base = ctx.base_tags();
        if let Some(h) = metrics.handle(self.data_sent, base) {
            h.increment(res.bytes_sent);
        }
        if let Some(h) = metrics.handle(self.data_received, base) {
            h.increment(res.bytes_received);
        }
    }

    /// A request that never produced a response. Tagged `status=0` plus the error kind.
    pub fn record_transport_error(
        &self,
        metrics: &Registry,
        ctx: &MetricsContext,
        label: RequestLabel<'_>,
        kind: HttpTransportErrorKind,
        elapsed: Duration,
    ) {
        let kind = kind.to_string();
        let tags = ctx.tags_with(
            metrics,
            &[
                ("method", label.method),
                ("status", "0"),
                ("name", label.name),
                ("error_kind", kind.as_str()),
            ],
        );

        if let Some(h) = metrics.handle(self.reqs, &tags) {
            h.increment(1);
        }
        if let Some(h) = metrics.handle(self.duration, &tags) {
            h.observe(millis(elapsed));
        }
        if let Some(h) = metrics.handle(self.failed, &tags) {
            h.add_rate(true);
        }
    }
}
