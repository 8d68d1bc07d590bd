//! Stop policy: ask the console first, kill the process tree if that fails.
use crate::config::Timeouts;
use crate::console::{ConsoleEndpoint, RemoteConsole, SHUTDOWN_COMMAND};
use crate::error::Result;
use crate::server::{ServerProcess, ShutdownStrategy, StopOutcome};
use async_trait::async_trait;

/// Graceful-then-forced shutdown.
///
/// With a console password configured, the console is probed and sent the
/// shutdown command, and the process gets `graceful_exit` to leave on its
/// own. Any failure along that path, or no password at all, ends in a
/// process-tree kill. The process is never left running.
pub struct GracefulShutdown<'a> {
    console: &'a dyn RemoteConsole,
    endpoint: ConsoleEndpoint,
    password: Option<&'a str>,
    timeouts: &'a Timeouts,
}

impl<'a> GracefulShutdown<'a> {
    /// Create a shutdown policy for the console at `endpoint`
    pub fn new(
        console: &'a dyn RemoteConsole,
        endpoint: ConsoleEndpoint,
        password: Option<&'a str>,
        timeouts: &'a Timeouts,
    ) -> Self {
        Self {
            console,
            endpoint,
            password,
            timeouts,
        }
    }

    /// Try the console path. Returns `true` if the process exited.
    async fn ask_to_stop(&self, process: &mut ServerProcess) -> bool {
        let Some(password) = self.password else {
            tracing::warn!("No console password configured, killing");
            return false;
        };

        if !self
            .console
            .probe_reachable(&self.endpoint, self.timeouts.probe)
            .await
        {
            tracing::warn!(endpoint = %self.endpoint, "Console unreachable, killing");
            return false;
        }

        if let Err(e) = self
            .console
            .run_command(&self.endpoint, password, SHUTDOWN_COMMAND, self.timeouts.console)
            .await
        {
            tracing::warn!(error = %e, "Console shutdown command failed, killing");
            return false;
        }

        tracing::info!(grace = ?self.timeouts.graceful_exit, "Shutdown command sent, waiting for exit");
        if process.wait_for_exit(self.timeouts.graceful_exit).await {
            return true;
        }

        tracing::warn!("Server did not exit within the grace window, killing");
        false
    }
}

#[async_trait]
impl ShutdownStrategy for GracefulShutdown<'_> {
    #[tracing::instrument(skip(self, process), fields(server = %process.name(), pid = process.pid()))]
    async fn shut_down(&self, process: &mut ServerProcess) -> Result<StopOutcome> {
        if self.ask_to_stop(process).await {
            // Launch script is gone; anything it left in its group goes too.
            process.signal_tree().await;
            return Ok(StopOutcome::StoppedSafely);
        }

        process.kill_tree(self.timeouts.kill).await?;
        Ok(StopOutcome::StoppedForcibly)
    }
}
