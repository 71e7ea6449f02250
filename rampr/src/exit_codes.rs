use rampr_core::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// The setup hook failed; no traffic was generated.
    SetupFailed = 20,

    /// Invalid CLI/config/options (bad flags, invalid durations, plan file errors, invalid thresholds syntax, etc.).
    InvalidInput = 30,

    /// Runtime fault (executor crash, transport abort, teardown failure, IO errors).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check failures never reach the exit code; only thresholds and faults do.
    #[must_use]
    pub fn from_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Passed => Self::Success,
            RunStatus::ThresholdsFailed => Self::ThresholdsFailed,
            RunStatus::Faulted => Self::RuntimeError,
        }
    }
}
