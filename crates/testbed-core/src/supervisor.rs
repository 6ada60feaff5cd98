//! Supervised execution of a service entry point.
//!
//! The supervisor owns a single execution slot. An execution runs on its own
//! tokio task and ends when the entry point returns, fails, panics, or is
//! reclaimed after ignoring a stop request for longer than the grace period.
//!
//! ```text
//!   launch ──► Running ──┬──► Completed          (entry point returned Ok)
//!                        ├──► Failed(reason)     (error, panic, or mark_failed)
//!                        └──► Reclaimed          (aborted after grace period)
//! ```

use crate::error::{HarnessError, Result};
use anyhow::Context;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::ffi::OsString;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Entry Points
// ============================================================================

/// Something that runs the service until told to stop.
///
/// `run` receives the absolute path of the generated configuration file and
/// a token that is cancelled when the harness wants the service to stop.
/// Returning `Ok(())` means the service shut down cleanly.
#[async_trait]
pub trait ServiceEntryPoint: Send + Sync + 'static {
    /// Runs the service.
    async fn run(&self, config_path: &Path, shutdown: CancellationToken) -> anyhow::Result<()>;
}

/// Runs the service as a child process.
///
/// The process is started as `program [args..] <config_path>`. A stop request
/// sends `SIGTERM` on unix (a kill elsewhere) and waits for the exit.
#[derive(Debug, Clone)]
pub struct ProcessEntryPoint {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    inherit_output: bool,
}

impl ProcessEntryPoint {
    /// Creates an entry point for `program`.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            inherit_output: true,
        }
    }

    /// Appends an argument placed before the configuration path.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments placed before the configuration path.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Sets the child's working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Discards the child's stdout and stderr instead of inheriting them.
    #[must_use]
    pub const fn quiet(mut self) -> Self {
        self.inherit_output = false;
        self
    }

    fn command(&self, config_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(config_path)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if !self.inherit_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl ServiceEntryPoint for ProcessEntryPoint {
    async fn run(&self, config_path: &Path, shutdown: CancellationToken) -> anyhow::Result<()> {
        let program = PathBuf::from(&self.program);
        let mut child = self
            .command(config_path)
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.display()))?;
        tracing::info!(program = %program.display(), pid = ?child.id(), "service process started");

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            () = shutdown.cancelled() => None,
        };

        if let Some(status) = exited {
            let status = status.context("failed to wait for service process")?;
            if status.success() {
                return Ok(());
            }
            anyhow::bail!("service process exited with {status}");
        }

        terminate(&mut child);
        let status = child
            .wait()
            .await
            .context("failed to wait for service process")?;
        tracing::debug!(%status, "service process stopped");
        Ok(())
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!(pid, "SIGTERM failed ({}), killing", e);
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Runs a blocking closure on tokio's blocking pool.
///
/// The closure must watch the token and return once it is cancelled; a
/// blocking thread cannot be aborted.
pub struct BlockingEntryPoint<F> {
    func: Arc<F>,
}

impl<F> BlockingEntryPoint<F>
where
    F: Fn(&Path, CancellationToken) -> anyhow::Result<()> + Send + Sync + 'static,
{
    /// Wraps `func` as an entry point.
    #[must_use]
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

impl<F> fmt::Debug for BlockingEntryPoint<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingEntryPoint").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> ServiceEntryPoint for BlockingEntryPoint<F>
where
    F: Fn(&Path, CancellationToken) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn run(&self, config_path: &Path, shutdown: CancellationToken) -> anyhow::Result<()> {
        let func = Arc::clone(&self.func);
        let config_path = config_path.to_path_buf();
        tokio::task::spawn_blocking(move || func(&config_path, shutdown))
            .await
            .context("blocking entry point panicked")?
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Status of a supervised execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Still running.
    Running,
    /// The entry point returned successfully.
    Completed,
    /// The entry point returned an error or panicked.
    Failed(String),
    /// Aborted after ignoring a stop request.
    Reclaimed,
}

impl ExecutionStatus {
    /// Returns true once the execution has ended, for whatever reason.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns true if the execution ended with an error or was reclaimed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Reclaimed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Reclaimed => write!(f, "reclaimed"),
        }
    }
}

/// Handle to the background task running an entry point.
struct SupervisedExecution {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
    status: Arc<watch::Sender<ExecutionStatus>>,
}

impl SupervisedExecution {
    fn status(&self) -> ExecutionStatus {
        self.status.borrow().clone()
    }

    fn is_done(&self) -> bool {
        self.status.borrow().is_done() || self.handle.is_finished()
    }
}

/// Owns at most one active supervised execution.
#[derive(Default)]
pub struct ServiceSupervisor {
    execution: Option<SupervisedExecution>,
}

impl fmt::Debug for ServiceSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSupervisor")
            .field("status", &self.status())
            .finish()
    }
}

impl ServiceSupervisor {
    /// Creates an empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `entry` on a new task and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] if an execution is still active.
    pub fn launch(&mut self, entry: Arc<dyn ServiceEntryPoint>, config_path: PathBuf) -> Result<()> {
        if self.execution.as_ref().is_some_and(|e| !e.is_done()) {
            return Err(HarnessError::invalid_state(
                "supervisor already has an active execution",
            ));
        }

        let shutdown = CancellationToken::new();
        let status = Arc::new(watch::Sender::new(ExecutionStatus::Running));

        let token = shutdown.clone();
        let task_status = Arc::clone(&status);
        let handle = tokio::spawn(async move {
            tracing::debug!(config = %config_path.display(), "entry point starting");
            let outcome = AssertUnwindSafe(entry.run(&config_path, token))
                .catch_unwind()
                .await;

            let next = match outcome {
                Ok(Ok(())) => {
                    tracing::info!("entry point returned");
                    ExecutionStatus::Completed
                }
                Ok(Err(e)) => {
                    tracing::error!("entry point failed: {:#}", e);
                    ExecutionStatus::Failed(format!("{e:#}"))
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    tracing::error!("entry point panicked: {}", reason);
                    ExecutionStatus::Failed(format!("panicked: {reason}"))
                }
            };
            task_status.send_replace(next);
        });

        self.execution = Some(SupervisedExecution {
            handle,
            shutdown,
            status,
        });
        Ok(())
    }

    /// Returns true if there is no active execution.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.execution.as_ref().is_none_or(SupervisedExecution::is_done)
    }

    /// Status of the current or last execution, if any was launched.
    #[must_use]
    pub fn status(&self) -> Option<ExecutionStatus> {
        self.execution.as_ref().map(SupervisedExecution::status)
    }

    /// Records a finished execution as failed with `reason`.
    ///
    /// Used when the harness gave up on an execution that then ended
    /// cleanly. Running executions and ones that already ended with an error
    /// keep their status.
    pub fn mark_failed(&self, reason: &str) {
        let Some(execution) = self.execution.as_ref() else {
            return;
        };
        execution.status.send_if_modified(|status| {
            if *status != ExecutionStatus::Completed {
                return false;
            }
            *status = ExecutionStatus::Failed(reason.to_string());
            true
        });
    }

    /// Asks the execution to stop and waits up to `grace` for it to end.
    ///
    /// An execution still running after the grace period is aborted and
    /// marked [`ExecutionStatus::Reclaimed`]. Does nothing if no execution is
    /// active.
    pub async fn request_stop(&mut self, grace: Duration) {
        let Some(execution) = self.execution.as_mut() else {
            return;
        };

        execution.shutdown.cancel();
        if execution.handle.is_finished() {
            return;
        }

        if tokio::time::timeout(grace, &mut execution.handle).await.is_ok() {
            tracing::debug!(status = %execution.status(), "execution ended within grace period");
            return;
        }

        tracing::warn!(
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "execution ignored stop request, reclaiming"
        );
        execution.handle.abort();
        if let Err(e) = (&mut execution.handle).await {
            if e.is_cancelled() {
                execution.status.send_replace(ExecutionStatus::Reclaimed);
            }
        }
    }
}

impl Drop for ServiceSupervisor {
    fn drop(&mut self) {
        if let Some(execution) = &self.execution {
            if !execution.is_done() {
                tracing::debug!("supervisor dropped with active execution, cancelling");
                execution.shutdown.cancel();
                execution.handle.abort();
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
