use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::scenario::{Scenario, ScenarioShared};
use crate::vu::{VuRuntime, VuSpec, VuState, run_vu};

/// Live executor counters, read by progress reporting.
#[derive(Debug, Default)]
pub(crate) struct ExecutorStatus {
    active: AtomicU64,
    target: AtomicU64,
    iterations: AtomicU64,
    done: AtomicBool,
}

impl ExecutorStatus {
    pub(crate) fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn target(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }

    pub(crate) fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn vu_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn vu_stopped(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn iteration_done(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecutorReport {
    pub(crate) elapsed: Duration,
    pub(crate) interrupted: u64,
}

struct VuSlot {
    state: Arc<VuState>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Indices of `n` VUs to stop.
///
/// Idle VUs go first, the one idle the longest before the others. If that is not enough, busy
/// VUs follow newest first; they are only asked to stop and finish their current iteration.
pub(crate) fn pick_victims(vus: &[(bool, Duration)], n: usize) -> Vec<usize> {
    let mut idle: Vec<(usize, Duration)> = vus
        .iter()
        .enumerate()
        .filter(|(_, (busy, _))| !busy)
        .map(|(i, (_, since))| (i, *since))
        .collect();
    idle.sort_by_key(|(i, since)| (*since, *i));

    let busy = vus
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, (busy, _))| *busy)
        .map(|(i, _)| i);

    idle.into_iter().map(|(i, _)| i).chain(busy).take(n).collect()
}

/// Drives one scenario: keeps the VU pool at the schedule's target until the schedule ends or
/// `token` is cancelled, then winds the pool down.
pub(crate) async fn run_executor<D: Send + Sync + 'static>(
    scenario: Arc<Scenario<D>>,
    shared: Arc<ScenarioShared>,
    data: Arc<D>,
    status: Arc<ExecutorStatus>,
    next_vu_id: Arc<AtomicU64>,
    token: CancellationToken,
) -> ExecutorReport {
    let schedule = scenario.executor.schedule();
    let capacity = scenario.executor.max_vus();
    let total = schedule.total_duration();

    let epoch = Instant::now();
    let deadline = tokio::time::Instant::from_std(epoch) + total;
    let rt = VuRuntime {
        shared: shared.clone(),
        exec: scenario.exec.clone(),
        data,
        status: status.clone(),
        epoch,
    };

    let mut interval = tokio::time::interval(schedule.reconcile_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pool: Vec<VuSlot> = Vec::new();
    let mut retiring: Vec<VuSlot> = Vec::new();
    let mut next_scenario_vu: u64 = 1;

    debug!(
        scenario = scenario.name.as_str(),
        executor = %scenario.executor.kind(),
        capacity,
        total_ms = total.as_millis() as u64,
        "executor started"
    );

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => break,
            _ = interval.tick() => {}
        }

        let elapsed = epoch.elapsed();
        if elapsed >= total {
            break;
        }

        retiring.retain(|slot| !slot.handle.is_finished());

        // Stopping VUs still count against capacity until their iteration is over.
        let room = capacity.saturating_sub(retiring.len() as u64);
        let target = schedule.target_at(elapsed).min(room);
        status.target.store(schedule.target_at(elapsed).min(capacity), Ordering::Relaxed);

        let current = pool.len() as u64;
        if target > current {
            for _ in current..target {
                let spec = VuSpec {
                    vu_id: next_vu_id.fetch_add(1, Ordering::Relaxed),
                    scenario_vu: next_scenario_vu,
                    seed: scenario.seed,
                    pause: scenario.pause,
                };
                next_scenario_vu = next_scenario_vu.saturating_add(1);

                let state = Arc::new(VuState::default());
                let stop = token.child_token();
                let handle = tokio::spawn(run_vu(rt.clone(), spec, state.clone(), stop.clone()));
                pool.push(VuSlot {
                    state,
                    stop,
                    handle,
                });
            }
        } else if target < current {
            let views: Vec<(bool, Duration)> = pool
                .iter()
                .map(|slot| (slot.state.in_iteration(), slot.state.idle_since()))
                .collect();
            let mut victims = pick_victims(&views, (current - target) as usize);
            victims.sort_unstable_by(|a, b| b.cmp(a));
            for idx in victims {
                let slot = pool.remove(idx);
                slot.stop.cancel();
                retiring.push(slot);
            }
        }
    }

    status.target.store(0, Ordering::Relaxed);
    token.cancel();

    let mut slots: Vec<VuSlot> = pool.into_iter().chain(retiring).collect();
    let interrupted = wind_down(&mut slots, scenario.graceful_stop).await;
    if interrupted > 0 {
        warn!(
            scenario = scenario.name.as_str(),
            interrupted, "iterations interrupted after graceful stop"
        );
        let run = &shared.run;
        run.iterations
            .record_interrupted(&run.metrics, &shared.ctx, interrupted);
    }

    status.done.store(true, Ordering::Release);
    let elapsed = epoch.elapsed();
    debug!(
        scenario = scenario.name.as_str(),
        elapsed_ms = elapsed.as_millis() as u64,
        iterations = status.iterations(),
        "executor finished"
    );

    ExecutorReport {
        elapsed,
        interrupted,
    }
}

/// Waits up to `grace` for every (already cancelled) VU, then aborts the stragglers.
/// Returns how many were cut off mid-iteration.
async fn wind_down(slots: &mut [VuSlot], grace: Duration) -> u64 {
    let joined = tokio::time::timeout(
        grace,
        futures::future::join_all(slots.iter_mut().map(|slot| &mut slot.handle)),
    )
    .await;

    match joined {
        Ok(results) => {
            for res in &results {
                log_vu_exit(res);
            }
            0
        }
        Err(_) => {
            let mut interrupted = 0;
            for slot in slots.iter_mut() {
                // A finished handle may already have been consumed by `join_all`.
                if slot.handle.is_finished() {
                    continue;
                }
                if slot.state.in_iteration() {
                    interrupted += 1;
                }
                slot.handle.abort();
                log_vu_exit(&(&mut slot.handle).await);
            }
            interrupted
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VuExit {
    Clean,
    /// Aborted after the graceful stop ran out.
    Aborted,
    Panicked,
}

fn vu_exit(res: &Result<(), JoinError>) -> VuExit {
    match res {
        Ok(()) => VuExit::Clean,
        Err(err) if err.is_cancelled() => VuExit::Aborted,
        Err(_) => VuExit::Panicked,
    }
}

fn log_vu_exit(res: &Result<(), JoinError>) {
    match vu_exit(res) {
        VuExit::Clean => {}
        VuExit::Aborted => debug!("vu task aborted after graceful stop"),
        VuExit::Panicked => {
            if let Err(err) = res {
                error!(error = %err, "vu task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vu_exits_tell_aborts_from_panics() {
        let clean = tokio::spawn(async {}).await;
        assert_eq!(vu_exit(&clean), VuExit::Clean);

        let pending = tokio::spawn(std::future::pending::<()>());
        pending.abort();
        assert_eq!(vu_exit(&pending.await), VuExit::Aborted);

        let panicked = tokio::spawn(async { panic!("vu exploded") }).await;
        assert_eq!(vu_exit(&panicked), VuExit::Panicked);
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn idle_vus_are_stopped_first_longest_idle_first() {
        let vus = [
            (true, ms(0)),
            (false, ms(300)),
            (false, ms(100)),
            (true, ms(0)),
            (false, ms(200)),
        ];
        assert_eq!(pick_victims(&vus, 2), vec![2, 4]);
        assert_eq!(pick_victims(&vus, 3), vec![2, 4, 1]);
    }

    #[test]
    fn busy_vus_are_stopped_newest_first_once_idle_ones_run_out() {
        let vus = [(true, ms(0)), (false, ms(50)), (true, ms(0)), (true, ms(0))];
        assert_eq!(pick_victims(&vus, 3), vec![1, 3, 2]);
        assert_eq!(pick_victims(&vus, 10), vec![1, 3, 2, 0]);
        assert!(pick_victims(&vus, 0).is_empty());
    }

    #[test]
    fn status_counts_follow_vu_lifecycle() {
        let status = ExecutorStatus::default();
        status.vu_started();
        status.vu_started();
        status.iteration_done();
        status.vu_stopped();
        assert_eq!(status.active(), 1);
        assert_eq!(status.iterations(), 1);
        assert!(!status.is_done());
    }
}
