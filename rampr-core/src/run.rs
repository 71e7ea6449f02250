use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use futures::FutureExt as _;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rampr_http::HttpTransport;
use rampr_metrics::Registry;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ScenarioExecutorKind;
use crate::error::{Error, Result};
use crate::executor::{ExecutorStatus, run_executor};
use crate::iteration_metrics::IterationMetricIds;
use crate::metrics_context::MetricsContext;
use crate::progress::{ProgressFn, ProgressUpdate, ScenarioProgress, StageProgress};
use crate::request_metrics::RequestMetricIds;
use crate::scenario::{ExecError, Scenario, ScenarioShared};
use crate::schedule::RampingSchedule;
use crate::summary::{AbortReason, RunFault, RunResult, ScenarioResult, run_status};
use crate::thresholds::{Threshold, ThresholdSet};
use crate::thresholds_eval::evaluate;
use crate::vu::panic_message;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Collaborators a run is wired to.
#[derive(Clone)]
pub struct RunContext {
    pub metrics: Arc<Registry>,
    pub client: Arc<dyn HttpTransport>,
    /// Cancel to stop the run early; VUs still get their graceful stop.
    pub abort: CancellationToken,
}

impl RunContext {
    pub fn new(client: Arc<dyn HttpTransport>) -> Self {
        Self {
            metrics: Arc::new(Registry::default()),
            client,
            abort: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("metrics", &self.metrics)
            .field("abort", &self.abort)
            .finish_non_exhaustive()
    }
}

/// What setup and teardown hooks get to work with.
#[derive(Clone)]
pub struct HookContext {
    pub client: Arc<dyn HttpTransport>,
    pub metrics: Arc<Registry>,
}

type SetupFn<D> =
    Box<dyn FnOnce(HookContext) -> BoxFuture<'static, std::result::Result<D, ExecError>> + Send>;
type TeardownFn<D> = Box<
    dyn FnOnce(HookContext, Arc<D>) -> BoxFuture<'static, std::result::Result<(), ExecError>>
        + Send,
>;

/// Scenarios, hooks and thresholds making up one run. `D` is the setup data handed to VUs.
pub struct RunPlan<D> {
    setup: SetupFn<D>,
    scenarios: Vec<Scenario<D>>,
    thresholds: Vec<ThresholdSet>,
    teardown: Option<TeardownFn<D>>,
    run_timeout: Option<Duration>,
    progress: Option<ProgressFn>,
}

impl RunPlan<()> {
    pub fn new() -> Self {
        Self::with_setup(|_| async { Ok(()) })
    }
}

impl Default for RunPlan<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Send + Sync + 'static> RunPlan<D> {
    /// Runs `setup` once before any VU starts; its value is shared with every iteration.
    pub fn with_setup<F, Fut>(setup: F) -> Self
    where
        F: FnOnce(HookContext) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<D, ExecError>> + Send + 'static,
    {
        Self {
            setup: Box::new(move |ctx| Box::pin(setup(ctx))),
            scenarios: Vec::new(),
            thresholds: Vec::new(),
            teardown: None,
            run_timeout: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn scenario(mut self, scenario: Scenario<D>) -> Self {
        self.scenarios.push(scenario);
        self
    }

    #[must_use]
    pub fn threshold(mut self, set: ThresholdSet) -> Self {
        self.thresholds.push(set);
        self
    }

    #[must_use]
    pub fn thresholds(mut self, sets: impl IntoIterator<Item = ThresholdSet>) -> Self {
        self.thresholds.extend(sets);
        self
    }

    #[must_use]
    pub fn teardown<F, Fut>(mut self, teardown: F) -> Self
    where
        F: FnOnce(HookContext, Arc<D>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), ExecError>> + Send + 'static,
    {
        self.teardown = Some(Box::new(move |ctx, data| Box::pin(teardown(ctx, data))));
        self
    }

    /// Hard cap on the whole run, on top of each scenario's own duration.
    #[must_use]
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn scenarios(&self) -> &[Scenario<D>] {
        &self.scenarios
    }
}

impl<D> fmt::Debug for RunPlan<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunPlan")
            .field("scenarios", &self.scenarios)
            .field("thresholds", &self.thresholds)
            .field("run_timeout", &self.run_timeout)
            .finish_non_exhaustive()
    }
}

/// Run-wide state reachable from every VU.
pub(crate) struct RunShared {
    pub(crate) metrics: Arc<Registry>,
    pub(crate) client: Arc<dyn HttpTransport>,
    pub(crate) requests: RequestMetricIds,
    pub(crate) iterations: IterationMetricIds,
    faults: Mutex<Vec<RunFault>>,
    aborted: Mutex<Option<AbortReason>>,
    token: CancellationToken,
}

impl fmt::Debug for RunShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunShared")
            .field("faults", &self.faults)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

impl RunShared {
    fn new(metrics: Arc<Registry>, client: Arc<dyn HttpTransport>) -> Self {
        Self {
            requests: RequestMetricIds::register(&metrics),
            iterations: IterationMetricIds::register(&metrics),
            metrics,
            client,
            faults: Mutex::new(Vec::new()),
            aborted: Mutex::new(None),
            token: CancellationToken::new(),
        }
    }

    /// Records an unrecoverable fault and cancels the run.
    pub(crate) fn fault(&self, fault: RunFault, reason: AbortReason) {
        if self.push_fault(fault) {
            self.abort(reason);
        }
    }

    /// Returns `false` for a repeat of a fault already on record.
    fn push_fault(&self, fault: RunFault) -> bool {
        let mut faults = self.faults.lock();
        let repeat = faults.iter().any(|f| match (f, &fault) {
            (
                RunFault::TransportAbort { scenario: a, .. },
                RunFault::TransportAbort { scenario: b, .. },
            ) => a == b,
            _ => false,
        });
        if repeat {
            return false;
        }
        error!(fault = %fault, "run fault");
        faults.push(fault);
        true
    }

    /// Cancels every executor. Only the first reason sticks.
    pub(crate) fn abort(&self, reason: AbortReason) {
        {
            let mut aborted = self.aborted.lock();
            if aborted.is_none() {
                info!(reason = %reason, "aborting run");
                *aborted = Some(reason);
            }
        }
        self.token.cancel();
    }
}

struct ScenarioView {
    name: String,
    executor: ScenarioExecutorKind,
    max_vus: u64,
    schedule: RampingSchedule,
    status: Arc<ExecutorStatus>,
}

impl ScenarioView {
    fn progress(&self, elapsed: Duration) -> ScenarioProgress {
        let stage = if self.executor.is_ramping() {
            self.schedule
                .stage_snapshot_at(elapsed)
                .map(StageProgress::from)
        } else {
            None
        };

        ScenarioProgress {
            name: self.name.clone(),
            executor: self.executor,
            active_vus: self.status.active(),
            target_vus: self.status.target(),
            iterations: self.status.iterations(),
            stage,
            total_duration: self.schedule.total_duration(),
            done: self.status.is_done(),
        }
    }
}

fn validate<D>(scenarios: &[Scenario<D>]) -> Result<()> {
    if scenarios.is_empty() {
        return Err(Error::NoScenarios);
    }
    let mut seen = HashSet::with_capacity(scenarios.len());
    for s in scenarios {
        if !seen.insert(s.name.as_str()) {
            return Err(Error::DuplicateScenario(s.name.clone()));
        }
        s.executor.validate()?;
    }
    Ok(())
}

fn compile_thresholds(sets: &[ThresholdSet]) -> Result<Vec<Threshold>> {
    let mut out = Vec::new();
    for set in sets {
        out.extend(set.compile()?);
    }
    Ok(out)
}

/// Executes `plan` to completion.
///
/// Fails only for problems found before any traffic was generated (invalid plan, failing setup).
/// Everything that goes wrong later ends up in the returned [`RunResult`].
pub async fn run<D: Send + Sync + 'static>(plan: RunPlan<D>, ctx: &RunContext) -> Result<RunResult> {
    let RunPlan {
        setup,
        scenarios,
        thresholds,
        teardown,
        run_timeout,
        progress,
    } = plan;

    validate(&scenarios)?;
    let thresholds = compile_thresholds(&thresholds)?;
    let abort_thresholds: Vec<Threshold> = thresholds
        .iter()
        .filter(|t| t.abort_on_fail)
        .cloned()
        .collect();

    let hooks = HookContext {
        client: ctx.client.clone(),
        metrics: ctx.metrics.clone(),
    };

    debug!("running setup");
    let setup_hooks = hooks.clone();
    let data = match AssertUnwindSafe(async move { setup(setup_hooks).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(data)) => Arc::new(data),
        Ok(Err(err)) => return Err(Error::Setup(err.to_string())),
        Err(payload) => {
            return Err(Error::Setup(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            )));
        }
    };

    let shared = Arc::new(RunShared::new(ctx.metrics.clone(), ctx.client.clone()));
    let token = shared.token.clone();
    let next_vu_id = Arc::new(AtomicU64::new(1));
    let started = Instant::now();

    let mut views = Vec::with_capacity(scenarios.len());
    let mut handles = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let status = Arc::new(ExecutorStatus::default());
        let scenario_shared = Arc::new(ScenarioShared {
            ctx: MetricsContext::new(&ctx.metrics, &scenario.name, &scenario.tags),
            run: shared.clone(),
            abort_on_transport_error: scenario.abort_on_transport_error,
        });

        views.push(ScenarioView {
            name: scenario.name.clone(),
            executor: scenario.executor.kind(),
            max_vus: scenario.executor.max_vus(),
            schedule: scenario.executor.schedule(),
            status: status.clone(),
        });

        handles.push(tokio::spawn(run_executor(
            Arc::new(scenario),
            scenario_shared,
            data.clone(),
            status,
            next_vu_id.clone(),
            token.child_token(),
        )));
    }

    info!(scenarios = views.len(), "run started");

    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let timeout = tokio::time::sleep(run_timeout.unwrap_or(Duration::MAX));
    tokio::pin!(timeout);
    let joined = futures::future::join_all(handles);
    tokio::pin!(joined);
    let mut tick: u64 = 0;

    let reports = loop {
        tokio::select! {
            reports = &mut joined => break reports,
            _ = ticker.tick() => {
                tick = tick.saturating_add(1);
                if let Some(progress) = &progress {
                    progress(progress_update(tick, started.elapsed(), &views));
                }
                if !abort_thresholds.is_empty() && !token.is_cancelled() {
                    let outcomes = evaluate(&abort_thresholds, &ctx.metrics);
                    // No samples yet is not a failure while the run is still going.
                    if let Some(failed) = outcomes.iter().find(|o| o.observed.is_some() && !o.passed) {
                        warn!(
                            metric = failed.metric.as_str(),
                            expression = failed.expression.as_str(),
                            observed = ?failed.observed,
                            "threshold crossed, aborting run"
                        );
                        shared.abort(AbortReason::Threshold);
                    }
                }
            }
            _ = &mut timeout, if run_timeout.is_some() && !token.is_cancelled() => {
                shared.abort(AbortReason::Timeout);
            }
            _ = ctx.abort.cancelled(), if !token.is_cancelled() => {
                shared.abort(AbortReason::External);
            }
        }
    };

    let mut scenario_results = Vec::with_capacity(views.len());
    for (view, joined) in views.iter().zip(reports) {
        let (elapsed, interrupted) = match joined {
            Ok(report) => (report.elapsed, report.interrupted),
            Err(err) => {
                let message = if err.is_panic() {
                    panic_message(err.into_panic().as_ref())
                } else {
                    err.to_string()
                };
                shared.push_fault(RunFault::ExecutorPanic {
                    scenario: view.name.clone(),
                    message,
                });
                (started.elapsed(), 0)
            }
        };
        scenario_results.push(ScenarioResult {
            name: view.name.clone(),
            executor: view.executor,
            max_vus: view.max_vus,
            elapsed,
            iterations: view.status.iterations(),
            interrupted,
        });
    }

    if let Some(progress) = &progress {
        progress(progress_update(
            tick.saturating_add(1),
            started.elapsed(),
            &views,
        ));
    }

    if let Some(teardown) = teardown {
        debug!("running teardown");
        let outcome = AssertUnwindSafe(async move { teardown(hooks, data).await })
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        };
        if let Some(message) = failure {
            shared.push_fault(RunFault::Teardown(message));
        }
    }

    let outcomes = evaluate(&thresholds, &ctx.metrics);
    let faults = shared.faults.lock().clone();
    let aborted = *shared.aborted.lock();
    let status = run_status(&outcomes, &faults);
    let elapsed = started.elapsed();

    info!(
        status = %status,
        elapsed_ms = elapsed.as_millis() as u64,
        "run finished"
    );

    Ok(RunResult {
        scenarios: scenario_results,
        metrics: ctx.metrics.series(),
        thresholds: outcomes,
        faults,
        status,
        elapsed,
        aborted,
    })
}

fn progress_update(tick: u64, elapsed: Duration, views: &[ScenarioView]) -> ProgressUpdate {
    ProgressUpdate {
        tick,
        elapsed,
        scenarios: views.iter().map(|v| v.progress(elapsed)).collect(),
    }
}
