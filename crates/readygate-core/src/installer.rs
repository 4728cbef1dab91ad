use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::command::{CommandOutcome, CommandRunner, CommandSpec};
use crate::error::{MANUAL_INSTALL_COMMAND, ReadinessError};

/// Deadline for `<binary> --version`.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One step of the install cascade.
///
/// A clean exit is never trusted on its own: `sh -c "a | sh"` reports the
/// status of the last pipeline member, so a failed download still exits 0.
/// The binary is probed again after every strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStrategy {
    pub name: String,
    pub command: CommandSpec,
}

impl InstallStrategy {
    /// The vendor's official script piped through `sh` via curl.
    pub fn official_script(script_url: &str, timeout: Duration) -> Self {
        Self {
            name: "official_script".into(),
            command: CommandSpec::shell(format!("curl -fsSL {script_url} | sh"), timeout),
        }
    }

    /// Same script fetched with wget, for hosts without curl.
    pub fn wget_script(script_url: &str, timeout: Duration) -> Self {
        Self {
            name: "wget_script".into(),
            command: CommandSpec::shell(format!("wget -qO- {script_url} | sh"), timeout),
        }
    }

    /// A script shipped alongside the application.
    pub fn bundled_script(path: &Path, timeout: Duration) -> Self {
        Self {
            name: "bundled_script".into(),
            command: CommandSpec::new("sh", [path.display().to_string()], timeout),
        }
    }
}

/// Makes sure the runtime binary exists, installing it through an ordered
/// cascade of strategies when it does not.
///
/// Nothing is cached: every call starts by probing the binary again, so a
/// manual install between calls is picked up immediately.
pub struct Installer {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    strategies: Vec<InstallStrategy>,
}

impl Installer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        binary: impl Into<String>,
        strategies: Vec<InstallStrategy>,
    ) -> Self {
        Self {
            runner,
            binary: binary.into(),
            strategies,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn strategies(&self) -> &[InstallStrategy] {
        &self.strategies
    }

    fn version_spec(&self) -> CommandSpec {
        CommandSpec::new(&self.binary, ["--version"], VERSION_PROBE_TIMEOUT)
    }

    /// Output of `<binary> --version`, or `None` when it does not run cleanly.
    pub async fn version(&self) -> Option<String> {
        match self.runner.run(&self.version_spec()).await {
            CommandOutcome::Success { stdout } => Some(stdout.trim().to_string()),
            _ => None,
        }
    }

    pub async fn is_installed(&self) -> bool {
        self.version().await.is_some()
    }

    pub async fn ensure_binary_present(&self) -> Result<(), ReadinessError> {
        if self.is_installed().await {
            tracing::debug!(binary = %self.binary, "Runtime binary present");
            return Ok(());
        }

        tracing::warn!(
            binary = %self.binary,
            strategies = self.strategies.len(),
            "Runtime binary not found, starting install cascade"
        );

        for strategy in &self.strategies {
            tracing::info!(
                strategy = %strategy.name,
                command = %strategy.command.display(),
                timeout = ?strategy.command.timeout,
                "Trying install strategy"
            );

            match self.runner.run(&strategy.command).await {
                CommandOutcome::Success { .. } => {
                    if self.is_installed().await {
                        tracing::info!(strategy = %strategy.name, "Runtime installed");
                        return Ok(());
                    }
                    tracing::warn!(
                        strategy = %strategy.name,
                        binary = %self.binary,
                        "Install strategy exited cleanly but the binary still does not run"
                    );
                }
                CommandOutcome::Failed { code, stderr } => {
                    tracing::warn!(strategy = %strategy.name, ?code, %stderr, "Install strategy failed");
                }
                CommandOutcome::TimedOut => {
                    tracing::warn!(strategy = %strategy.name, "Install strategy timed out");
                }
                CommandOutcome::NotFound => {
                    tracing::warn!(
                        strategy = %strategy.name,
                        program = %strategy.command.program,
                        "Install strategy program not found"
                    );
                }
                CommandOutcome::LaunchError(e) => {
                    tracing::warn!(strategy = %strategy.name, error = %e, "Install strategy could not start");
                }
            }
        }

        tracing::error!(
            manual_command = MANUAL_INSTALL_COMMAND,
            "Automatic installation failed"
        );
        Err(ReadinessError::install_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{StubCommandRunner, TokioCommandRunner};

    const URL: &str = "https://ollama.com/install.sh";

    fn installer(runner: Arc<StubCommandRunner>) -> Installer {
        Installer::new(
            runner,
            "ollama",
            vec![
                InstallStrategy::official_script(URL, Duration::from_secs(300)),
                InstallStrategy::wget_script(URL, Duration::from_secs(600)),
            ],
        )
    }

    #[tokio::test]
    async fn present_binary_skips_cascade() {
        let runner = Arc::new(StubCommandRunner::new().on(
            "--version",
            vec![CommandOutcome::Success {
                stdout: "ollama version is 0.5.7\n".into(),
            }],
        ));
        let installer = installer(runner.clone());

        installer.ensure_binary_present().await.unwrap();
        assert_eq!(runner.calls(), vec!["ollama --version"]);
        assert_eq!(installer.version().await.as_deref(), Some("ollama version is 0.5.7"));
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let runner = Arc::new(
            StubCommandRunner::new()
                .on("--version", vec![CommandOutcome::NotFound, CommandOutcome::success()])
                .on("curl", vec![CommandOutcome::success()])
                .on("wget", vec![CommandOutcome::success()]),
        );

        installer(runner.clone()).ensure_binary_present().await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].contains("curl -fsSL https://ollama.com/install.sh | sh"));
        assert_eq!(runner.count_matching("wget"), 0);
    }

    #[tokio::test]
    async fn primary_runs_before_fallback() {
        let runner = Arc::new(
            StubCommandRunner::new()
                .on("--version", vec![CommandOutcome::NotFound, CommandOutcome::success()])
                .on("curl", vec![CommandOutcome::failed(1)])
                .on("wget", vec![CommandOutcome::success()]),
        );

        installer(runner.clone()).ensure_binary_present().await.unwrap();

        let calls = runner.calls();
        let curl = calls.iter().position(|c| c.contains("curl")).unwrap();
        let wget = calls.iter().position(|c| c.contains("wget")).unwrap();
        assert!(curl < wget);
    }

    #[tokio::test]
    async fn unverified_primary_falls_through() {
        let runner = Arc::new(
            StubCommandRunner::new()
                .on("--version", vec![CommandOutcome::NotFound])
                .on("curl", vec![CommandOutcome::success()])
                .on("wget", vec![CommandOutcome::TimedOut]),
        );

        let err = installer(runner.clone()).ensure_binary_present().await.unwrap_err();
        assert_eq!(err, ReadinessError::install_failed());
        assert_eq!(runner.count_matching("wget"), 1);
    }

    #[tokio::test]
    async fn clean_fallback_exit_without_binary_fails() {
        let runner = Arc::new(
            StubCommandRunner::new()
                .on("--version", vec![CommandOutcome::NotFound])
                .on("curl", vec![CommandOutcome::failed(7)])
                .on("wget", vec![CommandOutcome::success()]),
        );

        let err = installer(runner.clone()).ensure_binary_present().await.unwrap_err();
        assert_eq!(err, ReadinessError::install_failed());
        // Initial probe plus the re-check after the fallback.
        assert_eq!(runner.count_matching("--version"), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreachable_script_url_fails_with_real_runner() {
        // Whether curl and wget exist or not, each pipeline ends in `sh`
        // reading empty input and exiting 0.
        let script_url = "http://127.0.0.1:9/install.sh";
        let installer = Installer::new(
            Arc::new(TokioCommandRunner::new()),
            "/nonexistent/readygate-test-runtime",
            vec![
                InstallStrategy::official_script(script_url, Duration::from_secs(20)),
                InstallStrategy::wget_script(script_url, Duration::from_secs(20)),
            ],
        );

        assert_eq!(
            installer.ensure_binary_present().await,
            Err(ReadinessError::install_failed())
        );
    }

    #[tokio::test]
    async fn exhausted_cascade_reports_manual_command() {
        let runner = Arc::new(
            StubCommandRunner::new()
                .on("--version", vec![CommandOutcome::NotFound])
                .on("curl", vec![CommandOutcome::failed(22)])
                .on("wget", vec![CommandOutcome::failed(8)]),
        );

        let err = installer(runner).ensure_binary_present().await.unwrap_err();
        match err {
            ReadinessError::InstallFailed { manual_command } => {
                assert_eq!(manual_command, MANUAL_INSTALL_COMMAND)
            }
            other => panic!("Expected InstallFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn every_call_reprobes() {
        let runner = Arc::new(StubCommandRunner::new().on("--version", vec![CommandOutcome::success()]));
        let installer = installer(runner.clone());

        installer.ensure_binary_present().await.unwrap();
        installer.ensure_binary_present().await.unwrap();
        assert_eq!(runner.count_matching("--version"), 2);
    }

    #[test]
    fn bundled_script_runs_through_sh() {
        let strategy =
            InstallStrategy::bundled_script(Path::new("/opt/app/install.sh"), Duration::from_secs(600));
        assert_eq!(strategy.command.display(), "sh /opt/app/install.sh");
    }
}
