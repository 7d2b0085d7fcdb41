//! External build and test tool invocation.
//!
//! Each stage runs exactly one subprocess. Its stdout and stderr go straight to
//! the operator's terminal; only the exit status comes back to the harness.

use crate::utils::errors::{HarnessError, Result};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One external command, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    /// Stage label used in logs (`build`, `test`)
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Wall-clock limit; `None` waits forever
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL when the tool has to be stopped
    pub kill_grace: Duration,
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a stage's tool finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Passed,
    /// Non-zero exit; `code` is `None` when the tool died from a signal
    Failed { code: Option<i32> },
    TimedOut(Duration),
    Cancelled,
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Passed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Passed => write!(f, "passed"),
            StageStatus::Failed { code: Some(code) } => write!(f, "failed (exit code {code})"),
            StageStatus::Failed { code: None } => write!(f, "failed (killed by signal)"),
            StageStatus::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs_f64()),
            StageStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Something that can run a build or test stage.
pub trait Invoker {
    /// Run the stage to completion, or until `cancel` fires.
    fn invoke(&self, cancel: &CancellationToken) -> impl Future<Output = Result<StageStatus>> + Send;
}

/// Runs a [`StageCommand`] as a child process.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    command: StageCommand,
}

enum Wait {
    Exited(std::io::Result<ExitStatus>),
    Deadline(Duration),
    Cancelled,
}

impl CommandInvoker {
    pub fn new(command: StageCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &StageCommand {
        &self.command
    }

    fn spawn(&self) -> Result<Child> {
        let cmd = &self.command;
        Command::new(&cmd.program)
            .args(&cmd.args)
            .current_dir(&cmd.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: cmd.program.clone(),
                source,
            })
    }
}

impl Invoker for CommandInvoker {
    async fn invoke(&self, cancel: &CancellationToken) -> Result<StageStatus> {
        let cmd = &self.command;
        info!(
            "[{}] running `{}` in {}",
            cmd.name,
            cmd,
            cmd.working_dir.display()
        );
        let start = Instant::now();
        let mut child = self.spawn()?;

        let deadline = async {
            match cmd.timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        // Ctrl-C reaches the tool too; a cancel that is already pending wins
        // over its exit.
        let wait = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wait::Cancelled,
            limit = deadline => Wait::Deadline(limit),
            status = child.wait() => Wait::Exited(status),
        };

        let status = match wait {
            Wait::Exited(Ok(status)) if status.success() => StageStatus::Passed,
            Wait::Exited(Ok(status)) if cancel.is_cancelled() || interrupted(&status) => {
                warn!("[{}] stopped by an interrupt ({})", cmd.name, status);
                StageStatus::Cancelled
            }
            Wait::Exited(Ok(status)) => StageStatus::Failed {
                code: status.code(),
            },
            Wait::Exited(Err(source)) => {
                return Err(HarnessError::Spawn {
                    program: cmd.program.clone(),
                    source,
                })
            }
            Wait::Deadline(limit) => {
                warn!("[{}] exceeded its {}s limit, stopping it", cmd.name, limit.as_secs());
                stop(&mut child, cmd.kill_grace, &cmd.name).await;
                StageStatus::TimedOut(limit)
            }
            Wait::Cancelled => {
                warn!("[{}] interrupted, stopping it", cmd.name);
                stop(&mut child, cmd.kill_grace, &cmd.name).await;
                StageStatus::Cancelled
            }
        };

        let elapsed = start.elapsed();
        if status.is_success() {
            info!("[{}] {} in {:.1}s", cmd.name, status, elapsed.as_secs_f64());
        } else {
            error!("[{}] {} after {:.1}s", cmd.name, status, elapsed.as_secs_f64());
        }
        Ok(status)
    }
}

/// The tool died from SIGINT, i.e. the operator pressed Ctrl-C before our own
/// handler cancelled the run.
#[cfg(unix)]
fn interrupted(status: &ExitStatus) -> bool {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    status.signal() == Some(Signal::SIGINT as i32)
}

#[cfg(not(unix))]
fn interrupted(_status: &ExitStatus) -> bool {
    false
}

/// SIGTERM, give the tool `grace` to exit, then SIGKILL.
async fn stop(child: &mut Child, grace: Duration, name: &str) {
    if terminate(child, grace, name).await {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!("[{}] kill failed: {}", name, e);
    }
}

/// Returns true when the tool exited within `grace` of SIGTERM.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration, name: &str) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!("[{}] SIGTERM failed: {}", name, e);
        return false;
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!("[{}] exited after SIGTERM: {}", name, status);
            true
        }
        Ok(Err(e)) => {
            warn!("[{}] wait after SIGTERM failed: {}", name, e);
            false
        }
        Err(_) => {
            warn!("[{}] still running after {}s, killing", name, grace.as_secs());
            false
        }
    }
}

#[cfg(not(unix))]
async fn terminate(_child: &mut Child, _grace: Duration, _name: &str) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn command(dir: &TempDir, program: &str, args: &[&str]) -> StageCommand {
        StageCommand {
            name: "test".to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: dir.path().to_path_buf(),
            timeout: None,
            kill_grace: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_zero_exit_passes() {
        let dir = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(command(&dir, "true", &[]));
        let status = invoker.invoke(&CancellationToken::new()).await.unwrap();
        assert_eq!(status, StageStatus::Passed);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_code() {
        let dir = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(command(&dir, "sh", &["-c", "exit 3"]));
        let status = invoker.invoke(&CancellationToken::new()).await.unwrap();
        assert_eq!(status, StageStatus::Failed { code: Some(3) });
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker"), b"x").unwrap();
        let invoker = CommandInvoker::new(command(&dir, "test", &["-f", "marker"]));
        let status = invoker.invoke(&CancellationToken::new()).await.unwrap();
        assert_eq!(status, StageStatus::Passed);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(command(&dir, "definitely-not-a-real-tool-xyz", &[]));
        let err = invoker.invoke(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_stops_tool() {
        let dir = TempDir::new().unwrap();
        let mut cmd = command(&dir, "sleep", &["30"]);
        cmd.timeout = Some(Duration::from_millis(100));
        let invoker = CommandInvoker::new(cmd);

        let start = Instant::now();
        let status = invoker.invoke(&CancellationToken::new()).await.unwrap();
        assert_eq!(status, StageStatus::TimedOut(Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_stops_tool() {
        let dir = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(command(&dir, "sleep", &["30"]));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let status = invoker.invoke(&cancel).await.unwrap();
        assert_eq!(status, StageStatus::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_pending_cancel_wins_over_failed_exit() {
        let dir = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(command(&dir, "sh", &["-c", "exit 1"]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let status = invoker.invoke(&cancel).await.unwrap();
        assert_eq!(status, StageStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_tool_killed_by_sigint_is_cancelled() {
        let dir = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(command(&dir, "sh", &["-c", "kill -INT $$; sleep 5"]));
        let status = invoker.invoke(&CancellationToken::new()).await.unwrap();
        assert_eq!(status, StageStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_tool_killed_by_other_signal_fails() {
        let dir = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(command(&dir, "sh", &["-c", "kill -KILL $$"]));
        let status = invoker.invoke(&CancellationToken::new()).await.unwrap();
        assert_eq!(status, StageStatus::Failed { code: None });
    }

    #[test]
    fn test_display() {
        let dir = TempDir::new().unwrap();
        let cmd = command(&dir, "cargo", &["test", "--all"]);
        assert_eq!(cmd.to_string(), "cargo test --all");
        assert_eq!(StageStatus::Failed { code: Some(101) }.to_string(), "failed (exit code 101)");
        assert_eq!(StageStatus::TimedOut(Duration::from_secs(2)).to_string(), "timed out after 2s");
    }
}
