use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    SetupFailed(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::SetupFailed(_) => ExitCode::SetupFailed,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::SetupFailed(e) | Self::RuntimeError(e) => e,
        }
    }
}

impl From<rampr_core::Error> for RunError {
    fn from(err: rampr_core::Error) -> Self {
        match err {
            rampr_core::Error::Setup(_) => Self::SetupFailed(err.into()),
            _ => Self::InvalidInput(err.into()),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(e) | Self::SetupFailed(e) | Self::RuntimeError(e) => {
                write!(f, "{e:#}")
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let setup = RunError::from(rampr_core::Error::Setup("connection refused".into()));
        assert_eq!(setup.exit_code(), ExitCode::SetupFailed);
        assert!(setup.to_string().contains("connection refused"));

        let invalid = RunError::from(rampr_core::Error::NoScenarios);
        assert_eq!(invalid.exit_code(), ExitCode::InvalidInput);
    }

    #[test]
    fn every_non_setup_core_error_is_invalid_input() {
        let errors = [
            rampr_core::Error::InvalidVus,
            rampr_core::Error::InvalidDuration,
            rampr_core::Error::MissingDuration,
            rampr_core::Error::InvalidExecutor("arrival-rate".into()),
            rampr_core::Error::InvalidStages,
            rampr_core::Error::InvalidPause,
            rampr_core::Error::DuplicateScenario("load".into()),
            rampr_core::Error::InvalidThreshold {
                metric: "http_req_failed".into(),
                error: "bad".into(),
            },
        ];
        for err in errors {
            let msg = err.to_string();
            let mapped = RunError::from(err);
            assert_eq!(mapped.exit_code(), ExitCode::InvalidInput, "{msg}");
        }
    }
}
