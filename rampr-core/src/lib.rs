//! Load-generation core: staged VU executors, a run coordinator and threshold evaluation on top
//! of the [`rampr_metrics`] sink.

mod choose;
mod config;
mod error;
mod executor;
mod iteration_metrics;
mod metrics_context;
mod progress;
mod request_metrics;
mod run;
mod scenario;
mod schedule;
mod summary;
mod thresholds;
mod thresholds_eval;
mod vu;

pub use choose::choose;
pub use config::{
    Pause, RunConfig, ScenarioExecutor, ScenarioExecutorKind, ScenarioOptions, Stage,
    executor_from_options,
};
pub use error::{Error, Result};
pub use iteration_metrics::ITERATION_ERROR_CHECK;
pub use metrics_context::RESERVED_TAG_KEYS;
pub use progress::{ProgressFn, ProgressUpdate, ScenarioProgress, StageProgress};
pub use run::{HookContext, RunContext, RunPlan, run};
pub use scenario::{DEFAULT_GRACEFUL_STOP, ExecError, ExecFn, ExecResult, Iteration, Scenario};
pub use schedule::{AfterLastStage, RampingSchedule, StageSnapshot};
pub use summary::{AbortReason, RunFault, RunResult, RunStatus, ScenarioResult};
pub use thresholds::{
    MetricSelector, Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSet,
    parse_selector, parse_threshold_expr,
};
pub use thresholds_eval::{ThresholdOutcome, evaluate as evaluate_thresholds, evaluate_expr, observed_value};

pub use rampr_http;
pub use rampr_metrics;
