use std::sync::Arc;
use std::time::Duration;

use crate::config::ScenarioExecutorKind;
use crate::schedule::StageSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

impl From<StageSnapshot> for StageProgress {
    fn from(st: StageSnapshot) -> Self {
        Self {
            stage: st.index + 1,
            stages: st.count,
            stage_elapsed: st.stage_elapsed,
            stage_remaining: st.stage_remaining,
            start_target: st.start_target,
            end_target: st.end_target,
            current_target: st.current_target,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioProgress {
    pub name: String,
    pub executor: ScenarioExecutorKind,
    pub active_vus: u64,
    pub target_vus: u64,
    /// Iterations finished so far, successful or not.
    pub iterations: u64,
    /// `None` for constant pools.
    pub stage: Option<StageProgress>,
    pub total_duration: Duration,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    pub scenarios: Vec<ScenarioProgress>,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
