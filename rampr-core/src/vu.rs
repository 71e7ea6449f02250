use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt as _;
use rampr_metrics::MetricHandle;
use rand::rngs::StdRng;
use rand::{RngCore as _, SeedableRng as _};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Pause;
use crate::executor::ExecutorStatus;
use crate::iteration_metrics::ITERATION_ERROR_CHECK;
use crate::scenario::{ExecError, ExecFn, Iteration, ScenarioShared};

/// What the executor can observe about a VU from the outside.
#[derive(Debug, Default)]
pub(crate) struct VuState {
    in_iteration: AtomicBool,
    /// Nanos since the executor epoch at which the VU last became idle.
    idle_since: AtomicU64,
}

impl VuState {
    pub(crate) fn in_iteration(&self) -> bool {
        self.in_iteration.load(Ordering::Acquire)
    }

    pub(crate) fn idle_since(&self) -> Duration {
        Duration::from_nanos(self.idle_since.load(Ordering::Acquire))
    }

    fn begin(&self) {
        self.in_iteration.store(true, Ordering::Release);
    }

    fn end(&self, epoch: Instant) {
        let nanos = epoch.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
        self.idle_since.store(nanos, Ordering::Release);
        self.in_iteration.store(false, Ordering::Release);
    }
}

/// Keeps the `vus`/`vus_max` gauges and the executor's live count in step with the VU task.
struct ActiveVuGuard {
    gauge: Option<MetricHandle>,
    status: Arc<ExecutorStatus>,
}

impl ActiveVuGuard {
    fn enter(shared: &ScenarioShared, status: Arc<ExecutorStatus>) -> Self {
        status.vu_started();

        let run = &shared.run;
        let gauge = run
            .iterations
            .vu_gauges(&run.metrics, &shared.ctx)
            .map(|(active, peak)| {
                peak.max_gauge(active.add_gauge(1));
                active
            });

        Self { gauge, status }
    }
}

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        if let Some(g) = &self.gauge {
            g.add_gauge(-1);
        }
        self.status.vu_stopped();
    }
}

/// Static identity of one VU.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VuSpec {
    pub(crate) vu_id: u64,
    pub(crate) scenario_vu: u64,
    pub(crate) seed: Option<u64>,
    pub(crate) pause: Pause,
}

impl VuSpec {
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.scenario_vu)),
            None => StdRng::from_entropy(),
        }
    }
}

/// How an iteration failed; used as the `error_kind` tag of the failed check.
fn classify(err: &ExecError) -> &'static str {
    if err.downcast_ref::<rampr_http::Error>().is_some() {
        "transport"
    } else {
        "callback"
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Everything a VU of one scenario shares with its siblings.
pub(crate) struct VuRuntime<D> {
    pub(crate) shared: Arc<ScenarioShared>,
    pub(crate) exec: ExecFn<D>,
    pub(crate) data: Arc<D>,
    pub(crate) status: Arc<ExecutorStatus>,
    /// Executor start; idle timestamps are relative to it.
    pub(crate) epoch: Instant,
}

impl<D> Clone for VuRuntime<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            exec: self.exec.clone(),
            data: self.data.clone(),
            status: self.status.clone(),
            epoch: self.epoch,
        }
    }
}

/// Loops over the scenario callback until `stop` fires.
///
/// Cancellation is checked before each iteration and while pausing; an iteration that already
/// started always runs to completion unless the task itself is aborted.
pub(crate) async fn run_vu<D: Send + Sync + 'static>(
    rt: VuRuntime<D>,
    spec: VuSpec,
    state: Arc<VuState>,
    stop: CancellationToken,
) {
    let VuRuntime {
        shared,
        exec,
        data,
        status,
        epoch,
    } = rt;
    let _active = ActiveVuGuard::enter(&shared, status.clone());
    let mut rng = spec.rng();
    let mut iteration: u64 = 0;

    debug!(
        scenario = shared.ctx.scenario(),
        vu_id = spec.vu_id,
        scenario_vu = spec.scenario_vu,
        "vu started"
    );

    while !stop.is_cancelled() {
        let it = Iteration {
            data: data.clone(),
            scenario: shared.clone(),
            vu_id: spec.vu_id,
            scenario_vu: spec.scenario_vu,
            iteration,
            rng: StdRng::seed_from_u64(rng.next_u64()),
            stop: stop.clone(),
        };

        state.begin();
        let started = Instant::now();
        let outcome = AssertUnwindSafe(async { (exec)(it).await })
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let pause_override = match outcome {
            Ok(Ok(pause)) => {
                record_iteration(&shared, true, elapsed);
                pause
            }
            Ok(Err(err)) => {
                let kind = classify(&err);
                warn!(
                    scenario = shared.ctx.scenario(),
                    vu_id = spec.vu_id,
                    iteration,
                    error_kind = kind,
                    error = %err,
                    "iteration failed"
                );
                record_failure(&shared, kind, elapsed);
                None
            }
            Err(payload) => {
                warn!(
                    scenario = shared.ctx.scenario(),
                    vu_id = spec.vu_id,
                    iteration,
                    panic = %panic_message(payload.as_ref()),
                    "iteration panicked"
                );
                record_failure(&shared, "panic", elapsed);
                None
            }
        };

        status.iteration_done();
        state.end(epoch);
        iteration = iteration.saturating_add(1);

        let pause = pause_override.unwrap_or_else(|| spec.pause.sample(&mut rng));
        if pause.is_zero() {
            // A callback that never awaits would otherwise hog the worker thread.
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    debug!(
        scenario = shared.ctx.scenario(),
        vu_id = spec.vu_id,
        iterations = iteration,
        "vu stopped"
    );
}

fn record_iteration(shared: &ScenarioShared, success: bool, elapsed: Duration) {
    let run = &shared.run;
    run.iterations
        .record_iteration(&run.metrics, &shared.ctx, success, elapsed);
}

fn record_failure(shared: &ScenarioShared, kind: &str, elapsed: Duration) {
    let run = &shared.run;
    record_iteration(shared, false, elapsed);
    run.iterations.record_check(
        &run.metrics,
        &shared.ctx,
        ITERATION_ERROR_CHECK,
        false,
        &[("error_kind", kind)],
    );
}
