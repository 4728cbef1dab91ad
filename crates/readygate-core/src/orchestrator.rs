use std::sync::Arc;

use crate::command::{CommandRunner, TokioCommandRunner};
use crate::config::ReadyGateConfig;
use crate::endpoint::ModelReference;
use crate::error::ReadinessError;
use crate::health::{HealthProbe, HttpHealthChecker};
use crate::installer::Installer;
use crate::process::{GroupProcessLauncher, ProcessLauncher};
use crate::provisioner::ModelProvisioner;
use crate::supervisor::ProcessSupervisor;

/// Terminal outcome of one readiness check. Nothing carries over between
/// calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessResult {
    Ready,
    Failed(ReadinessError),
}

impl ReadinessResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessResult::Ready)
    }

    pub fn error(&self) -> Option<&ReadinessError> {
        match self {
            ReadinessResult::Ready => None,
            ReadinessResult::Failed(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<(), ReadinessError> {
        match self {
            ReadinessResult::Ready => Ok(()),
            ReadinessResult::Failed(e) => Err(e),
        }
    }
}

/// The readiness gate: server up, then model present.
///
/// Built once by the application's startup routine and passed to whatever
/// issues inference requests. Cheap to call before every request; when the
/// runtime is already healthy and the model present it costs two HTTP probes.
pub struct ReadinessOrchestrator {
    supervisor: ProcessSupervisor,
    provisioner: ModelProvisioner,
    installer: Arc<Installer>,
    probe: Arc<dyn HealthProbe>,
}

impl ReadinessOrchestrator {
    /// Wire the real HTTP probe, subprocess runner and process launcher.
    pub fn from_config(config: &ReadyGateConfig) -> Self {
        Self::assemble(
            config,
            Arc::new(HttpHealthChecker::new()),
            Arc::new(TokioCommandRunner::new()),
            Arc::new(GroupProcessLauncher::new()),
        )
    }

    /// Wire the components around the given probe, runner and launcher.
    pub fn assemble(
        config: &ReadyGateConfig,
        probe: Arc<dyn HealthProbe>,
        runner: Arc<dyn CommandRunner>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let endpoint = config.endpoint();
        let installer = Arc::new(Installer::new(
            runner.clone(),
            &config.runtime.binary,
            config.install_strategies(),
        ));
        let supervisor = ProcessSupervisor::new(
            endpoint.clone(),
            config.supervisor_settings(),
            probe.clone(),
            launcher,
            installer.clone(),
        );
        let provisioner = ModelProvisioner::new(
            endpoint,
            &config.runtime.binary,
            config.pull_timeout(),
            probe.clone(),
            runner,
            installer.clone(),
        );
        Self {
            supervisor,
            provisioner,
            installer,
            probe,
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn provisioner(&self) -> &ModelProvisioner {
        &self.provisioner
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    pub fn probe(&self) -> &dyn HealthProbe {
        self.probe.as_ref()
    }

    /// Make sure the server is running and `model` is available, stopping at
    /// the first stage that fails.
    pub async fn ensure_ready(&mut self, model: &ModelReference) -> ReadinessResult {
        tracing::info!(%model, endpoint = %self.supervisor.endpoint(), "Ensuring runtime readiness");

        if let Err(e) = self.supervisor.start_if_needed().await {
            tracing::error!(%model, error = %e, recoverable = e.is_recoverable(), "Runtime server not available");
            return ReadinessResult::Failed(e);
        }

        if let Err(e) = self.provisioner.pull_if_missing(model).await {
            tracing::error!(%model, error = %e, recoverable = e.is_recoverable(), "Model not available");
            return ReadinessResult::Failed(e);
        }

        tracing::info!(%model, "Runtime ready");
        ReadinessResult::Ready
    }

    /// Stop the server if this orchestrator started it.
    pub async fn shutdown(&mut self) {
        self.supervisor.stop().await;
    }
}
