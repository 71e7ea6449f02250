pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error("`duration` is required for `constant-vus` scenarios")]
    MissingDuration,

    #[error("invalid `executor` `{0}` (expected `constant-vus` or `ramping-vus`)")]
    InvalidExecutor(String),

    #[error("`stages` must be a non-empty array of {{ duration, target }} with a positive total duration")]
    InvalidStages,

    #[error("`pause.min` must not exceed `pause.max`")]
    InvalidPause,

    #[error("at least one scenario is required")]
    NoScenarios,

    #[error("duplicate scenario name `{0}`")]
    DuplicateScenario(String),

    #[error("invalid threshold for metric `{metric}`: {error}")]
    InvalidThreshold { metric: String, error: String },

    #[error("setup failed: {0}")]
    Setup(String),
}
