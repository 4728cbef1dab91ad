use std::time::Duration;

use thiserror::Error;

/// Manual remediation shown to the user when automatic installation fails.
pub const MANUAL_INSTALL_COMMAND: &str = "curl -fsSL https://ollama.com/install.sh | sh";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("runtime binary `{binary}` not found")]
    BinaryMissing { binary: String },

    #[error("automatic installation failed; install manually with: {manual_command}")]
    InstallFailed { manual_command: String },

    #[error("runtime server did not become healthy within {timeout:?}")]
    ServerStartTimeout { timeout: Duration },

    #[error("runtime server unhealthy: {0}")]
    ServerUnhealthy(String),

    #[error("pulling model `{model}` failed: {detail}")]
    ModelPullFailed { model: String, detail: String },

    #[error("pulling model `{model}` timed out after {timeout:?}")]
    ModelPullTimeout { model: String, timeout: Duration },
}

impl ReadinessError {
    pub fn install_failed() -> Self {
        ReadinessError::InstallFailed {
            manual_command: MANUAL_INSTALL_COMMAND.into(),
        }
    }

    pub fn is_binary_missing(&self) -> bool {
        matches!(self, ReadinessError::BinaryMissing { .. })
    }

    /// Everything except a failed install cascade can succeed on a later call.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReadinessError::InstallFailed { .. })
    }

    /// Text the end user can act on, when there is one.
    pub fn remediation(&self) -> Option<String> {
        match self {
            ReadinessError::InstallFailed { manual_command } => {
                Some(format!("Install manually: {manual_command}"))
            }
            ReadinessError::BinaryMissing { .. } => {
                Some(format!("Install the runtime: {MANUAL_INSTALL_COMMAND}"))
            }
            ReadinessError::ServerStartTimeout { .. } | ReadinessError::ServerUnhealthy(_) => {
                Some("Start the server manually: ollama serve".into())
            }
            ReadinessError::ModelPullFailed { model, .. }
            | ReadinessError::ModelPullTimeout { model, .. } => {
                Some(format!("Pull the model manually: ollama pull {model}"))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
