use crate::config::TunnelSettings;
use crate::error::{Error, Result};
use crate::server::process::ServerProcess;
use std::time::Duration;

/// Name under which the tunnel appears in logs and errors
pub const TUNNEL_NAME: &str = "tunnel";

/// The shared tunnel process exposing every managed server to the internet.
///
/// At most one exists per [`ProcessSupervisor`](crate::server::ProcessSupervisor).
#[derive(Debug)]
pub struct TunnelProcess {
    process: ServerProcess,
}

impl TunnelProcess {
    /// Launch the tunnel executable detached.
    ///
    /// A missing executable is a launch failure, not something to skip.
    pub(crate) fn launch(settings: &TunnelSettings) -> Result<Self> {
        if !settings.executable.exists() {
            return Err(Error::LaunchFailed {
                name: TUNNEL_NAME.to_string(),
                reason: format!("executable not found at {:?}", settings.executable),
                tunnel_started: false,
            });
        }

        let process = ServerProcess::spawn(TUNNEL_NAME, &settings.executable, &settings.args, None)?;
        tracing::info!(pid = process.pid(), executable = ?settings.executable, "Tunnel launched");
        Ok(Self { process })
    }

    /// Get the OS process id
    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Time since the tunnel was launched
    pub fn uptime(&self) -> Duration {
        self.process.uptime()
    }

    /// Whether the tunnel process has not exited
    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Kill the tunnel and its children.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        self.process.kill_tree(timeout).await
    }
}
