use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use crate::process::{isolate_group, kill_group};

/// Longest stderr excerpt kept in a failure outcome.
const STDERR_TAIL_CHARS: usize = 400;

/// A one-shot subprocess invocation with a hard deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// Run `script` through `sh -c` (needed for pipelines).
    pub fn shell(script: impl Into<String>, timeout: Duration) -> Self {
        Self::new("sh", ["-c".to_string(), script.into()], timeout)
    }

    /// Human-readable command line for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// What happened when a command ran. Exit code 0 is the only success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success { stdout: String },
    Failed { code: Option<i32>, stderr: String },
    /// The program could not be found on the host.
    NotFound,
    TimedOut,
    LaunchError(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success { .. })
    }

    pub fn success() -> Self {
        CommandOutcome::Success {
            stdout: String::new(),
        }
    }

    pub fn failed(code: i32) -> Self {
        CommandOutcome::Failed {
            code: Some(code),
            stderr: String::new(),
        }
    }
}

/// Facade over subprocess execution so the installer and provisioner can be
/// driven by scripted outcomes in tests.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = CommandOutcome> + Send + 'a>>;
}

/// Runs commands with `tokio::process` in their own process group, killing
/// the whole group when the deadline passes.
#[derive(Debug, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for TokioCommandRunner {
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = CommandOutcome> + Send + 'a>> {
        Box::pin(async move {
            let mut command = tokio::process::Command::new(&spec.program);
            command
                .args(&spec.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            // Pipelines fork; the whole group goes down on timeout.
            isolate_group(&mut command);

            tracing::debug!(command = %spec.display(), timeout = ?spec.timeout, "Running command");

            let child = match command.spawn() {
                Ok(child) => child,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(program = %spec.program, "Program not found");
                    return CommandOutcome::NotFound;
                }
                Err(e) => return CommandOutcome::LaunchError(e.to_string()),
            };
            let pid = child.id();

            let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
                Err(_) => {
                    tracing::warn!(command = %spec.display(), timeout = ?spec.timeout, "Command timed out");
                    if let Err(e) = kill_group(pid) {
                        tracing::warn!(command = %spec.display(), error = %e, "Failed to kill timed-out command group");
                    }
                    return CommandOutcome::TimedOut;
                }
                Ok(Err(e)) => return CommandOutcome::LaunchError(e.to_string()),
                Ok(Ok(output)) => output,
            };

            if output.status.success() {
                CommandOutcome::Success {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                }
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                CommandOutcome::Failed {
                    code: output.status.code(),
                    stderr: tail(stderr.trim(), STDERR_TAIL_CHARS),
                }
            }
        })
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

struct Rule {
    needle: String,
    outcomes: VecDeque<CommandOutcome>,
    last: CommandOutcome,
}

/// Stub runner that returns scripted outcomes and records every invocation.
///
/// A rule matches when the command line contains its needle; the first
/// matching rule wins. Outcomes are consumed in order and the final one
/// repeats. Unmatched commands report [`CommandOutcome::NotFound`].
pub struct StubCommandRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl StubCommandRunner {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(self, needle: &str, outcomes: Vec<CommandOutcome>) -> Self {
        let last = outcomes.last().cloned().unwrap_or(CommandOutcome::NotFound);
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                needle: needle.to_string(),
                outcomes: outcomes.into(),
                last,
            });
        self
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

impl Default for StubCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for StubCommandRunner {
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = CommandOutcome> + Send + 'a>> {
        Box::pin(async move {
            let line = spec.display();
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(line.clone());

            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            match rules.iter_mut().find(|r| line.contains(&r.needle)) {
                Some(rule) => rule.outcomes.pop_front().unwrap_or_else(|| rule.last.clone()),
                None => CommandOutcome::NotFound,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_spec_wraps_script() {
        let spec = CommandSpec::shell("curl -fsSL x | sh", Duration::from_secs(1));
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c", "curl -fsSL x | sh"]);
        assert_eq!(spec.display(), "sh -c curl -fsSL x | sh");
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }

    #[tokio::test]
    async fn stub_consumes_outcomes_then_repeats_last() {
        let runner = StubCommandRunner::new().on(
            "--version",
            vec![CommandOutcome::NotFound, CommandOutcome::success()],
        );
        let spec = CommandSpec::new("ollama", ["--version"], Duration::from_secs(5));

        assert_eq!(runner.run(&spec).await, CommandOutcome::NotFound);
        assert!(runner.run(&spec).await.is_success());
        assert!(runner.run(&spec).await.is_success());
        assert_eq!(runner.count_matching("--version"), 3);
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let runner = TokioCommandRunner::new();
        let spec = CommandSpec::new(
            "readygate-definitely-not-installed",
            ["--version"],
            Duration::from_secs(5),
        );
        assert_eq!(runner.run(&spec).await, CommandOutcome::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_stderr() {
        let runner = TokioCommandRunner::new();
        let spec = CommandSpec::shell("echo boom >&2; exit 3", Duration::from_secs(5));
        match runner.run(&spec).await {
            CommandOutcome::Failed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    /// Live and not a zombie, per `/proc/<pid>/stat`.
    #[cfg(target_os = "linux")]
    fn is_live(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn deadline_kills_whole_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleep.pid");
        let script = format!(
            "sleep 30 & echo $! > {}; sleep 30 | cat",
            pid_file.display()
        );
        let runner = TokioCommandRunner::new();
        let spec = CommandSpec::shell(script, Duration::from_millis(500));

        assert_eq!(runner.run(&spec).await, CommandOutcome::TimedOut);

        let background: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_live(background), "background member {background} survived");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn enforces_deadline() {
        let runner = TokioCommandRunner::new();
        let spec = CommandSpec::new("sleep", ["5"], Duration::from_millis(100));
        assert_eq!(runner.run(&spec).await, CommandOutcome::TimedOut);
    }
}
