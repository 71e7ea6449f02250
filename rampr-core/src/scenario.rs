use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use rampr_http::{HttpRequest, HttpResponse};
use rampr_metrics::{MetricKind, Registry};
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

use crate::config::{Pause, ScenarioExecutor};
use crate::metrics_context::MetricsContext;
use crate::request_metrics::RequestLabel;
use crate::run::RunShared;
use crate::summary::{AbortReason, RunFault};

pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Anything a callback wants to bail out with.
pub type ExecError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `Ok(Some(pause))` replaces the scenario pause for this one iteration.
pub type ExecResult = std::result::Result<Option<Duration>, ExecError>;

pub type ExecFn<D> = Arc<dyn Fn(Iteration<D>) -> BoxFuture<'static, ExecResult> + Send + Sync>;

/// One named workload: an executor shape plus the callback every VU loops over.
pub struct Scenario<D> {
    pub(crate) name: String,
    pub(crate) tags: Vec<(String, String)>,
    pub(crate) executor: ScenarioExecutor,
    pub(crate) pause: Pause,
    pub(crate) graceful_stop: Duration,
    pub(crate) abort_on_transport_error: bool,
    pub(crate) seed: Option<u64>,
    pub(crate) exec: ExecFn<D>,
}

impl<D: Send + Sync + 'static> Scenario<D> {
    pub fn new<F, Fut>(name: impl Into<String>, executor: ScenarioExecutor, exec: F) -> Self
    where
        F: Fn(Iteration<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExecResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            tags: Vec::new(),
            executor,
            pause: Pause::None,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            abort_on_transport_error: false,
            seed: None,
            exec: Arc::new(move |it| Box::pin(exec(it))),
        }
    }
}

impl<D> Scenario<D> {
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = (String, String)>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_pause(mut self, pause: Pause) -> Self {
        self.pause = pause;
        self
    }

    #[must_use]
    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    /// Treat a transport error as fatal for the whole run instead of a failed iteration.
    #[must_use]
    pub fn abort_on_transport_error(mut self, abort: bool) -> Self {
        self.abort_on_transport_error = abort;
        self
    }

    /// Makes every VU's RNG stream reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    pub fn executor(&self) -> &ScenarioExecutor {
        &self.executor
    }

    pub fn pause(&self) -> Pause {
        self.pause
    }

    pub fn graceful_stop(&self) -> Duration {
        self.graceful_stop
    }
}

impl<D> fmt::Debug for Scenario<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("executor", &self.executor)
            .field("pause", &self.pause)
            .field("graceful_stop", &self.graceful_stop)
            .field("abort_on_transport_error", &self.abort_on_transport_error)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// Per-scenario state shared by all of its VUs.
#[derive(Debug)]
pub(crate) struct ScenarioShared {
    pub(crate) ctx: MetricsContext,
    pub(crate) run: Arc<RunShared>,
    pub(crate) abort_on_transport_error: bool,
}

impl ScenarioShared {
    pub(crate) fn metrics(&self) -> &Registry {
        &self.run.metrics
    }
}

/// Handle passed to the scenario callback for a single iteration.
pub struct Iteration<D> {
    pub(crate) data: Arc<D>,
    pub(crate) scenario: Arc<ScenarioShared>,
    pub(crate) vu_id: u64,
    pub(crate) scenario_vu: u64,
    pub(crate) iteration: u64,
    pub(crate) rng: StdRng,
    pub(crate) stop: CancellationToken,
}

impl<D> Iteration<D> {
    /// Data returned by the setup hook.
    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<D> {
        self.data.clone()
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Run-wide VU number, unique across scenarios.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 1-based VU number within the scenario.
    pub fn scenario_vu(&self) -> u64 {
        self.scenario_vu
    }

    /// 0-based iteration counter of this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn scenario(&self) -> &str {
        self.scenario.ctx.scenario()
    }

    /// The VU has been asked to stop. The current iteration may still finish.
    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn metrics(&self) -> &Registry {
        self.scenario.metrics()
    }

    /// Sends `req` through the run's transport and records the HTTP metrics.
    pub async fn request(&self, req: HttpRequest) -> rampr_http::Result<HttpResponse> {
        let run = &self.scenario.run;
        let method = req.method.clone();
        let name = req.name().to_string();
        let label = RequestLabel {
            method: method.as_str(),
            name: &name,
        };

        let started = Instant::now();
        match run.client.request(req).await {
            Ok(res) => {
                run.requests
                    .record_response(&run.metrics, &self.scenario.ctx, label, &res);
                Ok(res)
            }
            Err(err) => {
                run.requests.record_transport_error(
                    &run.metrics,
                    &self.scenario.ctx,
                    label,
                    err.transport_error_kind(),
                    started.elapsed(),
                );
                if self.scenario.abort_on_transport_error {
                    run.fault(
                        RunFault::TransportAbort {
                            scenario: self.scenario().to_string(),
                            error: err.to_string(),
                        },
                        AbortReason::TransportError,
                    );
                }
                Err(err)
            }
        }
    }

    /// Records a `checks` sample and hands `passed` back.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        let run = &self.scenario.run;
        run.iterations
            .record_check(&run.metrics, &self.scenario.ctx, name, passed, &[]);
        passed
    }

    pub fn add_counter(&self, metric: &str, value: u64, tags: &[(&str, &str)]) {
        self.custom(metric, MetricKind::Counter, tags, |h| h.increment(value));
    }

    pub fn add_gauge(&self, metric: &str, value: i64, tags: &[(&str, &str)]) {
        self.custom(metric, MetricKind::Gauge, tags, |h| h.set_gauge(value));
    }

    pub fn add_rate(&self, metric: &str, hit: bool, tags: &[(&str, &str)]) {
        self.custom(metric, MetricKind::Rate, tags, |h| h.add_rate(hit));
    }

    pub fn add_trend(&self, metric: &str, value: f64, tags: &[(&str, &str)]) {
        self.custom(metric, MetricKind::Trend, tags, |h| h.observe(value));
    }

    fn custom(
        &self,
        metric: &str,
        kind: MetricKind,
        tags: &[(&str, &str)],
        apply: impl FnOnce(&rampr_metrics::MetricHandle),
    ) {
        let metrics = self.metrics();
        let id = metrics.register(metric, kind);
        let tags = self.scenario.ctx.tags_with(metrics, tags);
        if let Some(handle) = metrics.handle(id, &tags) {
            apply(&handle);
        }
    }
}

impl<D> fmt::Debug for Iteration<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iteration")
            .field("scenario", &self.scenario())
            .field("vu_id", &self.vu_id)
            .field("scenario_vu", &self.scenario_vu)
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}
