//! Detached process handles.
//!
//! All platform-specific process-group handling lives here. The server is
//! spawned into its own process group so it does not receive the caller's
//! terminal signals, yet the whole group can still be terminated together.
//!
//! On Windows there is no graceful group signal: [`ProcessHandle::signal`]
//! hard-kills the direct child only, so the shutdown grace period has no
//! effect and grandchildren are not reached.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::ReadinessError;

/// A running process this crate launched.
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Ask the process group to terminate gracefully (a hard kill of the
    /// direct child on Windows).
    fn signal(&mut self) -> std::io::Result<()>;

    /// Wait up to `limit` for exit. `Ok(true)` once the process has exited.
    fn wait<'a>(
        &'a mut self,
        limit: Duration,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<bool>> + Send + 'a>>;

    /// Force-kill the process group and reap the child.
    fn kill<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>>;

    /// Exit status, if the process has already exited on its own.
    fn try_exited(&mut self) -> Option<String>;
}

pub trait ProcessLauncher: Send + Sync {
    /// Spawn `program` detached with null stdio. A missing program maps to
    /// [`ReadinessError::BinaryMissing`].
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn ProcessHandle>, ReadinessError>;
}

/// Launches processes in a fresh process group (a new console process group
/// on Windows).
#[derive(Debug, Default)]
pub struct GroupProcessLauncher;

impl GroupProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

impl ProcessLauncher for GroupProcessLauncher {
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn ProcessHandle>, ReadinessError> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        isolate_group(&mut command);

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReadinessError::BinaryMissing {
                    binary: program.to_string(),
                }
            } else {
                ReadinessError::ServerUnhealthy(format!("failed to spawn `{program}`: {e}"))
            }
        })?;

        tracing::info!(program, pid = ?child.id(), "Spawned detached process");
        Ok(Box::new(GroupProcess { child }))
    }
}

/// Start `command`'s child in a fresh process group so it and everything it
/// forks can be signalled together.
pub(crate) fn isolate_group(command: &mut tokio::process::Command) {
    #[cfg(unix)]
    command.process_group(0);
    #[cfg(windows)]
    command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// Force-kill the whole group led by `pid`. Off unix only the direct child
/// can be killed, through its handle.
pub(crate) fn kill_group(pid: Option<u32>) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(())
    }
}

struct GroupProcess {
    child: tokio::process::Child,
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        // Already reaped.
        return Ok(());
    };
    // The child leads its own group, so its pid is the group id.
    match nix::sys::signal::killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl ProcessHandle for GroupProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn signal(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            signal_group(self.child.id(), nix::sys::signal::Signal::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    fn wait<'a>(
        &'a mut self,
        limit: Duration,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            match tokio::time::timeout(limit, self.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(%status, "Process exited");
                    Ok(true)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Ok(false),
            }
        })
    }

    fn kill<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            #[cfg(unix)]
            {
                kill_group(self.child.id())?;
                self.child.wait().await.map(|_| ())
            }
            #[cfg(not(unix))]
            {
                self.child.kill().await
            }
        })
    }

    fn try_exited(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown status: {e}")),
        }
    }
}

/// Counters shared between a [`StubLauncher`] and the handles it returns.
#[derive(Debug, Default)]
pub struct ProcessLog {
    pub spawn_attempts: AtomicUsize,
    pub spawns: AtomicUsize,
    pub signals: AtomicUsize,
    pub kills: AtomicUsize,
}

impl ProcessLog {
    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn signals(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

/// Stub launcher that spawns nothing and records what the supervisor asked
/// of it.
pub struct StubLauncher {
    log: Arc<ProcessLog>,
    missing_attempts: usize,
    exits_on_signal: bool,
    exits_immediately: bool,
}

impl StubLauncher {
    pub fn new() -> Self {
        Self {
            log: Arc::new(ProcessLog::default()),
            missing_attempts: 0,
            exits_on_signal: true,
            exits_immediately: false,
        }
    }

    /// Report the binary as missing for the first `attempts` spawns.
    pub fn missing_for(mut self, attempts: usize) -> Self {
        self.missing_attempts = attempts;
        self
    }

    /// Handles ignore the graceful signal and need a kill.
    pub fn ignoring_signals(mut self) -> Self {
        self.exits_on_signal = false;
        self
    }

    /// Handles report an exit status straight away.
    pub fn exiting_immediately(mut self) -> Self {
        self.exits_immediately = true;
        self
    }

    pub fn log(&self) -> Arc<ProcessLog> {
        self.log.clone()
    }
}

impl Default for StubLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for StubLauncher {
    fn spawn(&self, program: &str, _args: &[String]) -> Result<Box<dyn ProcessHandle>, ReadinessError> {
        let attempt = self.log.spawn_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.missing_attempts {
            return Err(ReadinessError::BinaryMissing {
                binary: program.to_string(),
            });
        }
        self.log.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubProcess {
            log: self.log.clone(),
            exits_on_signal: self.exits_on_signal,
            exits_immediately: self.exits_immediately,
            exited: false,
        }))
    }
}

struct StubProcess {
    log: Arc<ProcessLog>,
    exits_on_signal: bool,
    exits_immediately: bool,
    exited: bool,
}

impl ProcessHandle for StubProcess {
    fn id(&self) -> Option<u32> {
        (!self.exited).then_some(4242)
    }

    fn signal(&mut self) -> std::io::Result<()> {
        self.log.signals.fetch_add(1, Ordering::SeqCst);
        if self.exits_on_signal {
            self.exited = true;
        }
        Ok(())
    }

    fn wait<'a>(
        &'a mut self,
        limit: Duration,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            if !self.exited {
                tokio::time::sleep(limit).await;
            }
            Ok(self.exited)
        })
    }

    fn kill<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.log.kills.fetch_add(1, Ordering::SeqCst);
            self.exited = true;
            Ok(())
        })
    }

    fn try_exited(&mut self) -> Option<String> {
        if self.exits_immediately {
            self.exited = true;
            Some("exit status: 1".into())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_maps_to_binary_missing() {
        let launcher = GroupProcessLauncher::new();
        let result = launcher.spawn("readygate-definitely-not-installed", &["serve".into()]);
        match result {
            Err(ReadinessError::BinaryMissing { binary }) => {
                assert_eq!(binary, "readygate-definitely-not-installed")
            }
            Err(other) => panic!("Expected BinaryMissing, got {other:?}"),
            Ok(_) => panic!("Expected BinaryMissing, got a process"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminates_whole_group() {
        let launcher = GroupProcessLauncher::new();
        let mut handle = launcher.spawn("sleep", &["30".into()]).unwrap();
        let pid = handle.id().unwrap();

        assert!(handle.try_exited().is_none());
        handle.signal().unwrap();
        assert!(handle.wait(Duration::from_secs(5)).await.unwrap());

        // Reaped: the pid no longer refers to a live process.
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None);
        assert!(alive.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_reaps_process() {
        let launcher = GroupProcessLauncher::new();
        let mut handle = launcher.spawn("sleep", &["30".into()]).unwrap();

        assert!(!handle.wait(Duration::from_millis(50)).await.unwrap());
        handle.kill().await.unwrap();
        assert!(handle.id().is_none());
    }

    #[tokio::test]
    async fn stub_records_spawns_and_signals() {
        let launcher = StubLauncher::new().missing_for(1);
        let log = launcher.log();

        assert!(launcher.spawn("ollama", &[]).is_err());
        let mut handle = launcher.spawn("ollama", &[]).unwrap();
        handle.signal().unwrap();

        assert_eq!(log.spawns(), 1);
        assert_eq!(log.signals(), 1);
        assert!(handle.wait(Duration::from_millis(1)).await.unwrap());
    }
}
