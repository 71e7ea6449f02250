use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use rampr_core::{ProgressFn, RunResult, Scenario, ScenarioExecutor, ScenarioProgress};
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

fn describe_executor(executor: &ScenarioExecutor) -> String {
    match executor {
        ScenarioExecutor::ConstantVus { vus, duration } => {
            format!("constant-vus vus={vus} duration={}", format_duration(*duration))
        }
        ScenarioExecutor::RampingVus { start_vus, stages } => {
            let profile = stages
                .iter()
                .map(|s| format!("{}@{}", s.target, format_duration(s.duration)))
                .collect::<Vec<_>>()
                .join(" → ");
            format!("ramping-vus start={start_vus} stages=[{profile}]")
        }
    }
}

/// Bar message for one scenario; `iters_per_sec` comes from the previous tick.
fn progress_message(s: &ScenarioProgress, iters_per_sec: f64) -> String {
    let mut msg = format!(
        "vus={}/{} iters={} iters/s={}",
        s.active_vus,
        s.target_vus,
        s.iterations,
        format_rate(iters_per_sec)
    );
    if let Some(stage) = &s.stage {
        msg.push_str(&format!(
            " stage={}/{} target={} stage_remaining={}",
            stage.stage,
            stage.stages,
            stage.current_target,
            format_duration(stage.stage_remaining)
        ));
    }
    if s.done {
        msg.push_str(" done");
    }
    msg
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, scenarios: &[Scenario<()>]) {
        println!("plan: {}", plan_path.display());
        for s in scenarios {
            println!(
                "scenario: {} {} graceful_stop={}",
                s.name(),
                describe_executor(s.executor()),
                format_duration(s.graceful_stop())
            );
        }
        if !scenarios.is_empty() {
            println!();
        }
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        let prev: Arc<Mutex<HashMap<String, (u64, Duration)>>> =
            Arc::new(Mutex::new(HashMap::new()));

        Some(Arc::new(move |u| {
            for s in &u.scenarios {
                let (prev_iters, prev_at) = {
                    let mut inner = prev
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    inner
                        .insert(s.name.clone(), (s.iterations, u.elapsed))
                        .unwrap_or_default()
                };

                let dt = u.elapsed.saturating_sub(prev_at).as_secs_f64().max(1e-9);
                let rate = s.iterations.saturating_sub(prev_iters) as f64 / dt;
                let elapsed = u.elapsed.min(s.total_duration);
                progress.update(
                    &s.name,
                    s.total_duration,
                    elapsed,
                    s.done,
                    progress_message(s, rate),
                );
            }
        }))
    }

    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(result));
        Ok(())
    }
}
