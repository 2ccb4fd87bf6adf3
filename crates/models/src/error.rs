use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("Source tree error: {reason}")]
    SourceTree { reason: String },

    #[error("Step '{step}' failed with exit code {exit_code:?}: {stderr}")]
    StepFailed {
        step: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error(
        "Dependency install failed under both resolvers; primary: {primary}; legacy: {fallback}"
    )]
    DependencyInstallFailed { primary: String, fallback: String },

    #[error("Docker error: {message}")]
    DockerError { message: String },

    #[error("Service did not start listening within {timeout_ms}ms")]
    LaunchTimeout { timeout_ms: u64 },

    #[error("Internal error: {reason}")]
    InternalError { reason: String },
}

impl BootstrapError {
    /// Process exit code reported by the CLI. Every pipeline failure is
    /// fatal; the codes only distinguish the failing stage for operators.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::ConfigError { .. } => 2,
            BootstrapError::SourceTree { .. } => 3,
            BootstrapError::StepFailed { .. } => 4,
            BootstrapError::DependencyInstallFailed { .. } => 5,
            BootstrapError::DockerError { .. } => 6,
            BootstrapError::LaunchTimeout { .. } => 7,
            BootstrapError::InternalError { .. } => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_failure_retains_both_reasons() {
        let err = BootstrapError::DependencyInstallFailed {
            primary: "ResolutionImpossible".to_string(),
            fallback: "No matching distribution".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("ResolutionImpossible"));
        assert!(text.contains("No matching distribution"));
    }

    #[test]
    fn every_failure_maps_to_nonzero_exit() {
        let err = BootstrapError::StepFailed {
            step: "rebuild font cache".to_string(),
            exit_code: Some(1),
            stderr: "fc-cache: command not found".to_string(),
        };
        assert_ne!(err.exit_code(), 0);
    }
}
