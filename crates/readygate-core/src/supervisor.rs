use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::endpoint::RuntimeEndpoint;
use crate::error::ReadinessError;
use crate::health::HealthProbe;
use crate::installer::Installer;
use crate::process::{ProcessHandle, ProcessLauncher};
use crate::remedy::retry_once_after;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub binary: String,
    pub serve_args: Vec<String>,
    /// How long a freshly spawned server gets to answer the health probe.
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// Grace period between the termination signal and a forced kill.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            binary: "ollama".into(),
            serve_args: vec!["serve".into()],
            startup_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A healthy server was already there; nothing was spawned or claimed.
    AlreadyRunning,
    /// This supervisor spawned the server and now owns it.
    Spawned,
}

/// A server process this supervisor spawned.
struct SupervisedProcess {
    handle: Box<dyn ProcessHandle>,
    started_at: Instant,
}

/// Owns the lifecycle of the runtime server process it launched.
///
/// A server found already running is used but never owned, so `stop` leaves
/// it alone. Mutation goes through `&mut self`; whoever holds the supervisor
/// is the only party that can terminate the server. Dropping the supervisor
/// leaves a spawned server running (it is detached); call [`stop`] at
/// shutdown.
///
/// [`stop`]: ProcessSupervisor::stop
pub struct ProcessSupervisor {
    endpoint: RuntimeEndpoint,
    settings: SupervisorSettings,
    probe: Arc<dyn HealthProbe>,
    launcher: Arc<dyn ProcessLauncher>,
    installer: Arc<Installer>,
    process: Option<SupervisedProcess>,
}

impl ProcessSupervisor {
    pub fn new(
        endpoint: RuntimeEndpoint,
        settings: SupervisorSettings,
        probe: Arc<dyn HealthProbe>,
        launcher: Arc<dyn ProcessLauncher>,
        installer: Arc<Installer>,
    ) -> Self {
        Self {
            endpoint,
            settings,
            probe,
            launcher,
            installer,
            process: None,
        }
    }

    pub fn endpoint(&self) -> &RuntimeEndpoint {
        &self.endpoint
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn owns_process(&self) -> bool {
        self.process.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.handle.id())
    }

    /// Make sure a healthy server answers on the endpoint, spawning one if
    /// needed.
    ///
    /// Safe to call repeatedly: while the server is healthy this is a single
    /// HTTP probe and never spawns a second process.
    pub async fn start_if_needed(&mut self) -> Result<StartOutcome, ReadinessError> {
        if self.probe.is_running(&self.endpoint).await {
            tracing::info!(endpoint = %self.endpoint, owned = self.owns_process(), "Runtime server already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        if self.process.is_some() {
            tracing::warn!(pid = ?self.pid(), "Owned runtime server is no longer healthy, replacing it");
            self.stop().await;
        }

        let spawned = {
            let endpoint = &self.endpoint;
            let probe = &self.probe;
            let launcher = &self.launcher;
            let settings = &self.settings;
            let installer = &self.installer;
            let mut recheck = false;

            retry_once_after(
                "start_server",
                move || {
                    // The retry follows an install, which may itself have
                    // started the server as a service.
                    let check_health = recheck;
                    recheck = true;
                    async move {
                        if check_health && probe.is_running(endpoint).await {
                            return Ok(None);
                        }
                        tracing::info!(
                            binary = %settings.binary,
                            args = ?settings.serve_args,
                            "Starting runtime server"
                        );
                        launcher
                            .spawn(&settings.binary, &settings.serve_args)
                            .map(Some)
                    }
                },
                ReadinessError::is_binary_missing,
                move || installer.ensure_binary_present(),
            )
            .await
        };

        let handle = match spawned {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                tracing::info!(endpoint = %self.endpoint, "Runtime server came up during installation");
                return Ok(StartOutcome::AlreadyRunning);
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not start runtime server");
                return Err(e);
            }
        };

        self.process = Some(SupervisedProcess {
            handle,
            started_at: Instant::now(),
        });
        self.await_healthy().await
    }

    /// Poll the health probe until the spawned server answers, it exits, or
    /// the startup timeout elapses. Anything but a healthy answer stops the
    /// process.
    async fn await_healthy(&mut self) -> Result<StartOutcome, ReadinessError> {
        let timeout = self.settings.startup_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            if self.probe.is_running(&self.endpoint).await {
                let elapsed = self.process.as_ref().map(|p| p.started_at.elapsed());
                tracing::info!(endpoint = %self.endpoint, ?elapsed, pid = ?self.pid(), "Runtime server healthy");
                return Ok(StartOutcome::Spawned);
            }

            let exited = self.process.as_mut().and_then(|p| p.handle.try_exited());
            if let Some(status) = exited {
                tracing::error!(%status, "Runtime server exited before becoming healthy");
                self.stop().await;
                return Err(ReadinessError::ServerUnhealthy(format!(
                    "server exited before becoming healthy ({status})"
                )));
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        tracing::error!(?timeout, endpoint = %self.endpoint, "Runtime server did not become healthy in time");
        self.stop().await;
        Err(ReadinessError::ServerStartTimeout { timeout })
    }

    /// Terminate the server this supervisor spawned, if any.
    ///
    /// Sends a graceful signal to the process group, waits out the grace
    /// period, then force-kills. Ownership is released in every case, so a
    /// second call is a no-op.
    pub async fn stop(&mut self) {
        let Some(mut process) = self.process.take() else {
            tracing::debug!("No owned runtime server to stop");
            return;
        };

        tracing::info!(
            pid = ?process.handle.id(),
            uptime = ?process.started_at.elapsed(),
            "Stopping runtime server"
        );

        if let Err(e) = process.handle.signal() {
            tracing::warn!(error = %e, "Failed to signal runtime server");
        }

        let grace = self.settings.shutdown_grace;
        match process.handle.wait(grace).await {
            Ok(true) => tracing::info!("Runtime server stopped"),
            Ok(false) => {
                tracing::warn!(?grace, "Runtime server ignored termination, killing");
                if let Err(e) = process.handle.kill().await {
                    tracing::error!(error = %e, "Failed to kill runtime server");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed waiting for runtime server, killing");
                if let Err(e) = process.handle.kill().await {
                    tracing::error!(error = %e, "Failed to kill runtime server");
                }
            }
        }
    }
}
