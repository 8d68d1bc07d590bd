// src/server/process.rs
use crate::error::{Error, Result};
use async_process::{Child, Command};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Unique identifier for one spawned process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(Uuid);

impl ProcessId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build a command whose process tree is detached from ours.
///
/// The child gets its own process group (a new console on Windows) so that
/// signals aimed at the runner do not reach it and so that the whole tree
/// can be signalled at once.
fn detached_command(program: &Path, args: &[String], cwd: Option<&Path>) -> Command {
    let mut command = std::process::Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(CREATE_NEW_CONSOLE | CREATE_NEW_PROCESS_GROUP);
    }

    Command::from(command)
}

/// A live OS process owned by the supervisor.
///
/// One exists per running server, plus one for the tunnel. Dropping it does
/// not kill the process.
pub struct ServerProcess {
    /// Spawn identifier
    id: ProcessId,
    /// Server name, or `tunnel`
    name: String,
    /// Child process
    child: Child,
    /// OS process id, also the process group id on Unix
    pid: u32,
    /// When the spawn succeeded
    started_at: Instant,
}

impl ServerProcess {
    /// Spawn `program` detached, optionally inside `cwd`.
    pub(crate) fn spawn(
        name: &str,
        program: &Path,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<Self> {
        let child = detached_command(program, args, cwd).spawn().map_err(|e| {
            Error::LaunchFailed {
                name: name.to_string(),
                reason: format!("failed to spawn {:?}: {}", program, e),
                tunnel_started: false,
            }
        })?;

        let pid = child.id();
        Ok(Self {
            id: ProcessId::new(),
            name: name.to_string(),
            child,
            pid,
            started_at: Instant::now(),
        })
    }

    /// Get the spawn ID
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Get the server name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the OS process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// When the process was spawned
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time since the process was spawned
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the process has not exited yet.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_status() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::debug!(server = %self.name, pid = self.pid, ?status, "Process has exited");
                false
            }
            Err(e) => {
                // Unknown state: treat as alive so it is never started twice.
                tracing::warn!(server = %self.name, pid = self.pid, error = %e, "Could not poll process");
                true
            }
        }
    }

    /// Wait up to `timeout` for the process to exit on its own.
    ///
    /// Returns `true` if it exited.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.child.status()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, pid = self.pid, ?status, "Process exited");
                true
            }
            Ok(Err(e)) => {
                // Nothing left to wait on.
                tracing::debug!(server = %self.name, pid = self.pid, error = %e, "Wait failed");
                true
            }
            Err(_) => false,
        }
    }

    /// Kill the process and all of its descendants, then wait up to
    /// `timeout` for exit confirmation.
    ///
    /// A process that is already gone counts as killed. The group is
    /// signalled either way, since children can outlive the launch script.
    #[tracing::instrument(skip(self), fields(server = %self.name, pid = self.pid))]
    pub async fn kill_tree(&mut self, timeout: Duration) -> Result<()> {
        self.signal_tree().await;

        if !self.is_alive() {
            tracing::debug!("Direct child already gone");
            return Ok(());
        }

        // Direct child too, in case it left its group.
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "Direct kill failed, process likely gone");
        }

        if self.wait_for_exit(timeout).await {
            tracing::info!("Process tree killed");
            Ok(())
        } else {
            Err(Error::Timeout(format!(
                "'{}' (pid {}) did not exit within {:?} of being killed",
                self.name, self.pid, timeout
            )))
        }
    }

    /// Kill whatever is left in the process group without waiting.
    ///
    /// An empty group is not an error.
    #[cfg(unix)]
    pub(crate) async fn signal_tree(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            Ok(()) => {}
            Err(Errno::ESRCH) => tracing::debug!("Process group already gone"),
            Err(e) => tracing::warn!(error = %e, "Failed to signal process group"),
        }
    }

    #[cfg(windows)]
    pub(crate) async fn signal_tree(&self) {
        let result = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &self.pid.to_string()])
            .stdout(async_process::Stdio::null())
            .stderr(async_process::Stdio::null())
            .status()
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to run taskkill");
        }
    }

    #[cfg(not(any(unix, windows)))]
    pub(crate) async fn signal_tree(&self) {}
}

impl fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pid", &self.pid)
            .finish()
    }
}
