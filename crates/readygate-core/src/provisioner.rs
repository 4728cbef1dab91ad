use std::sync::Arc;
use std::time::Duration;

use crate::command::{CommandOutcome, CommandRunner, CommandSpec};
use crate::endpoint::{ModelReference, RuntimeEndpoint};
use crate::error::ReadinessError;
use crate::health::HealthProbe;
use crate::installer::Installer;
use crate::remedy::retry_once_after;

/// Default deadline for `<binary> pull <model>`; downloads can be large.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    AlreadyPresent,
    Pulled,
}

/// Makes sure a model is in the runtime's local store, downloading it only
/// when the store does not already list it.
pub struct ModelProvisioner {
    endpoint: RuntimeEndpoint,
    binary: String,
    pull_timeout: Duration,
    probe: Arc<dyn HealthProbe>,
    runner: Arc<dyn CommandRunner>,
    installer: Arc<Installer>,
}

impl ModelProvisioner {
    pub fn new(
        endpoint: RuntimeEndpoint,
        binary: impl Into<String>,
        pull_timeout: Duration,
        probe: Arc<dyn HealthProbe>,
        runner: Arc<dyn CommandRunner>,
        installer: Arc<Installer>,
    ) -> Self {
        Self {
            endpoint,
            binary: binary.into(),
            pull_timeout,
            probe,
            runner,
            installer,
        }
    }

    pub async fn is_present(&self, model: &ModelReference) -> bool {
        self.probe
            .list_models(&self.endpoint)
            .await
            .is_ok_and(|models| models.contains(model))
    }

    pub async fn pull_if_missing(&self, model: &ModelReference) -> Result<PullOutcome, ReadinessError> {
        match self.probe.list_models(&self.endpoint).await {
            Ok(models) if models.contains(model) => {
                tracing::info!(%model, "Model already available");
                return Ok(PullOutcome::AlreadyPresent);
            }
            Ok(models) => {
                tracing::debug!(%model, available = models.len(), "Model not in store");
            }
            Err(e) => {
                tracing::warn!(%model, error = %e, "Could not list models, pulling anyway");
            }
        }

        let spec = CommandSpec::new(
            &self.binary,
            ["pull".to_string(), model.to_string()],
            self.pull_timeout,
        );
        tracing::info!(%model, timeout = ?self.pull_timeout, "Pulling model, this may take several minutes");

        let result = {
            let runner = &self.runner;
            let spec = &spec;
            let installer = &self.installer;
            let binary = self.binary.as_str();
            retry_once_after(
                "pull_model",
                move || async move { interpret_pull(binary, model, spec, runner.run(spec).await) },
                ReadinessError::is_binary_missing,
                move || installer.ensure_binary_present(),
            )
            .await
        };

        match result {
            Ok(()) => {
                tracing::info!(%model, "Model pulled");
                Ok(PullOutcome::Pulled)
            }
            Err(e) => {
                tracing::error!(%model, error = %e, "Model pull failed");
                Err(e)
            }
        }
    }
}

fn interpret_pull(
    binary: &str,
    model: &ModelReference,
    spec: &CommandSpec,
    outcome: CommandOutcome,
) -> Result<(), ReadinessError> {
    match outcome {
        CommandOutcome::Success { .. } => Ok(()),
        CommandOutcome::NotFound => Err(ReadinessError::BinaryMissing {
            binary: binary.to_string(),
        }),
        CommandOutcome::TimedOut => Err(ReadinessError::ModelPullTimeout {
            model: model.to_string(),
            timeout: spec.timeout,
        }),
        CommandOutcome::Failed { code, stderr } => Err(ReadinessError::ModelPullFailed {
            model: model.to_string(),
            detail: match code {
                Some(code) => format!("exit code {code}: {stderr}"),
                None => format!("terminated by signal: {stderr}"),
            },
        }),
        CommandOutcome::LaunchError(e) => Err(ReadinessError::ModelPullFailed {
            model: model.to_string(),
            detail: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::StubHealthProbe;
    use crate::installer::InstallStrategy;
    use crate::command::StubCommandRunner;

    const URL: &str = "https://ollama.com/install.sh";

    fn provisioner(probe: StubHealthProbe, runner: Arc<StubCommandRunner>) -> ModelProvisioner {
        let installer = Arc::new(Installer::new(
            runner.clone(),
            "ollama",
            vec![InstallStrategy::official_script(URL, Duration::from_secs(300))],
        ));
        ModelProvisioner::new(
            RuntimeEndpoint::default(),
            "ollama",
            DEFAULT_PULL_TIMEOUT,
            Arc::new(probe),
            runner,
            installer,
        )
    }

    #[tokio::test]
    async fn present_model_is_not_pulled() {
        let runner = Arc::new(StubCommandRunner::new());
        let provisioner = provisioner(StubHealthProbe::running().with_models(&["modelA"]), runner.clone());

        let outcome = provisioner.pull_if_missing(&"modelA".into()).await.unwrap();
        assert_eq!(outcome, PullOutcome::AlreadyPresent);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn match_is_exact() {
        let runner = Arc::new(StubCommandRunner::new().on("pull", vec![CommandOutcome::success()]));
        let provisioner = provisioner(StubHealthProbe::running().with_models(&["modelA:latest"]), runner.clone());

        let outcome = provisioner.pull_if_missing(&"modelA".into()).await.unwrap();
        assert_eq!(outcome, PullOutcome::Pulled);
        assert_eq!(runner.calls(), vec!["ollama pull modelA"]);
    }

    #[tokio::test]
    async fn listing_failure_still_pulls() {
        let runner = Arc::new(StubCommandRunner::new().on("pull", vec![CommandOutcome::success()]));
        let provisioner = provisioner(StubHealthProbe::running().listing_fails(), runner.clone());

        assert_eq!(provisioner.pull_if_missing(&"m1".into()).await, Ok(PullOutcome::Pulled));
        assert!(!provisioner.is_present(&"m1".into()).await);
    }

    #[tokio::test]
    async fn timeout_is_not_retried() {
        let runner = Arc::new(StubCommandRunner::new().on("pull", vec![CommandOutcome::TimedOut]));
        let provisioner = provisioner(StubHealthProbe::running(), runner.clone());

        let err = provisioner.pull_if_missing(&"m1".into()).await.unwrap_err();
        assert_eq!(
            err,
            ReadinessError::ModelPullTimeout {
                model: "m1".into(),
                timeout: DEFAULT_PULL_TIMEOUT
            }
        );
        assert_eq!(runner.count_matching("pull"), 1);
    }

    #[tokio::test]
    async fn failed_pull_carries_stderr() {
        let runner = Arc::new(StubCommandRunner::new().on(
            "pull",
            vec![CommandOutcome::Failed {
                code: Some(1),
                stderr: "pull model manifest: file does not exist".into(),
            }],
        ));
        let provisioner = provisioner(StubHealthProbe::running(), runner.clone());

        match provisioner.pull_if_missing(&"nope".into()).await {
            Err(ReadinessError::ModelPullFailed { model, detail }) => {
                assert_eq!(model, "nope");
                assert!(detail.contains("file does not exist"));
            }
            other => panic!("Expected ModelPullFailed, got {other:?}"),
        }
        assert_eq!(runner.count_matching("pull"), 1);
    }

    #[tokio::test]
    async fn missing_binary_installs_then_retries_pull_once() {
        let runner = Arc::new(
            StubCommandRunner::new()
                .on("pull", vec![CommandOutcome::NotFound, CommandOutcome::success()])
                .on("--version", vec![CommandOutcome::NotFound, CommandOutcome::success()])
                .on("curl", vec![CommandOutcome::success()]),
        );
        let provisioner = provisioner(StubHealthProbe::running(), runner.clone());

        assert_eq!(provisioner.pull_if_missing(&"m1".into()).await, Ok(PullOutcome::Pulled));
        assert_eq!(runner.count_matching("pull"), 2);
        assert_eq!(runner.count_matching("curl"), 1);
    }

    #[tokio::test]
    async fn failed_install_stops_pull() {
        let runner = Arc::new(
            StubCommandRunner::new()
                .on("pull", vec![CommandOutcome::NotFound])
                .on("--version", vec![CommandOutcome::NotFound])
                .on("curl", vec![CommandOutcome::failed(1)]),
        );
        let provisioner = provisioner(StubHealthProbe::running(), runner.clone());

        assert_eq!(
            provisioner.pull_if_missing(&"m1".into()).await,
            Err(ReadinessError::install_failed())
        );
        assert_eq!(runner.count_matching("pull"), 1);
    }
}
