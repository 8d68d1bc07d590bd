use crate::config::{ServerRecord, Timeouts, TunnelSettings};
use crate::error::{Error, Result};
use crate::server::process::ServerProcess;
use crate::server::tunnel::TunnelProcess;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

/// Outcome of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new server process was spawned
    Started {
        /// OS process id of the launch script
        pid: u32,
        /// Whether the tunnel was launched for this start
        tunnel_started: bool,
    },
    /// A live process already exists; nothing was done
    AlreadyRunning,
}

/// Outcome of a stop request. All three are successful terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The server exited on its own after the console shutdown command
    StoppedSafely,
    /// The process tree had to be killed
    StoppedForcibly,
    /// No live process existed; nothing was done
    NotRunning,
}

/// Decides how a live process is brought down.
///
/// The supervisor owns the handle and the tunnel; the strategy owns the
/// graceful-versus-forced policy.
#[async_trait]
pub trait ShutdownStrategy: Send + Sync {
    /// Bring `process` down. Must return only once it has exited, or fail.
    async fn shut_down(&self, process: &mut ServerProcess) -> Result<StopOutcome>;
}

/// Kills the process tree straight away.
#[derive(Debug, Clone, Copy)]
pub struct ForceKill {
    /// How long to wait for exit confirmation
    pub timeout: Duration,
}

#[async_trait]
impl ShutdownStrategy for ForceKill {
    async fn shut_down(&self, process: &mut ServerProcess) -> Result<StopOutcome> {
        process.kill_tree(self.timeout).await?;
        Ok(StopOutcome::StoppedForcibly)
    }
}

/// Owner of every server process and of the shared tunnel.
///
/// Only the supervisor spawns or kills processes. Paths that need both
/// locks take the tunnel lock first, then the handle map, so deciding to
/// tear the tunnel down and recording a new server never interleave.
pub struct ProcessSupervisor {
    /// Live server processes by name
    servers: Mutex<HashMap<String, ServerProcess>>,
    /// The shared tunnel
    tunnel: Mutex<Option<TunnelProcess>>,
    /// Tunnel executable and arguments
    tunnel_settings: TunnelSettings,
    /// Wait after launching the tunnel
    tunnel_grace: Duration,
    /// Wait for exit confirmation after a kill
    kill_timeout: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor with no processes
    pub fn new(tunnel_settings: TunnelSettings, timeouts: &Timeouts) -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            tunnel: Mutex::new(None),
            tunnel_settings,
            tunnel_grace: timeouts.tunnel_grace,
            kill_timeout: timeouts.kill,
        }
    }

    /// Drop handles whose launch script has exited, killing whatever it
    /// left behind in its process group.
    async fn prune(servers: &mut HashMap<String, ServerProcess>) {
        let exited: Vec<String> = servers
            .iter_mut()
            .filter_map(|(name, process)| (!process.is_alive()).then(|| name.clone()))
            .collect();

        for name in exited {
            if let Some(process) = servers.remove(&name) {
                tracing::info!(server = %name, pid = process.pid(), "Server process exited on its own");
                process.signal_tree().await;
            }
        }
    }

    /// Whether a live process exists for `name`
    pub async fn is_running(&self, name: &str) -> bool {
        let mut servers = self.servers.lock().await;
        Self::prune(&mut servers).await;
        servers.contains_key(name)
    }

    /// Names of servers with a live process, sorted
    pub async fn running_names(&self) -> Vec<String> {
        let mut servers = self.servers.lock().await;
        Self::prune(&mut servers).await;
        let mut names: Vec<String> = servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// OS process id of a live server
    pub async fn pid(&self, name: &str) -> Option<u32> {
        let mut servers = self.servers.lock().await;
        Self::prune(&mut servers).await;
        servers.get(name).map(ServerProcess::pid)
    }

    /// Whether the tunnel is live
    pub async fn tunnel_running(&self) -> bool {
        self.tunnel_pid().await.is_some()
    }

    /// OS process id of the live tunnel
    pub async fn tunnel_pid(&self) -> Option<u32> {
        let mut tunnel = self.tunnel.lock().await;
        let process = tunnel.as_mut()?;
        if process.is_alive() {
            return Some(process.pid());
        }

        tracing::warn!("Tunnel process exited on its own");
        *tunnel = None;
        None
    }

    /// Launch the tunnel unless it is already live.
    ///
    /// Returns `true` when this call launched it.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_tunnel(&self) -> Result<bool> {
        let mut tunnel = self.tunnel.lock().await;
        self.ensure_tunnel_locked(&mut tunnel).await
    }

    /// Launch the tunnel into `tunnel` unless it is already live. The grace
    /// period is waited with the lock held so concurrent starts never
    /// launch twice.
    async fn ensure_tunnel_locked(&self, tunnel: &mut Option<TunnelProcess>) -> Result<bool> {
        if let Some(process) = tunnel.as_mut() {
            if process.is_alive() {
                return Ok(false);
            }
            tracing::warn!(pid = process.pid(), "Tunnel process died, relaunching");
        }

        let process = TunnelProcess::launch(&self.tunnel_settings)?;
        *tunnel = Some(process);
        tokio::time::sleep(self.tunnel_grace).await;
        Ok(true)
    }

    /// Tear the tunnel down if `force` is set or no server is live.
    ///
    /// Returns `true` when a live tunnel was killed. The emptiness check and
    /// the kill happen under the tunnel lock, so a concurrent start either
    /// lands before the check or relaunches the tunnel afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn release_tunnel(&self, force: bool) -> Result<bool> {
        let mut tunnel = self.tunnel.lock().await;
        if !force {
            let mut servers = self.servers.lock().await;
            Self::prune(&mut servers).await;
            if !servers.is_empty() {
                tracing::debug!(live = servers.len(), "Servers still live, keeping tunnel");
                return Ok(false);
            }
        }

        let Some(mut process) = tunnel.take() else {
            return Ok(false);
        };
        if !process.is_alive() {
            return Ok(false);
        }

        if let Err(e) = process.shutdown(self.kill_timeout).await {
            *tunnel = Some(process);
            return Err(e);
        }
        tracing::info!("Tunnel torn down");
        Ok(true)
    }

    /// Tear down a tunnel left behind by servers that all exited on their
    /// own. Failures are logged.
    pub async fn reap(&self) {
        match self.release_tunnel(false).await {
            Ok(true) => tracing::info!("No server left alive, tunnel released"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Tunnel teardown failed"),
        }
    }

    /// Start a registered server.
    ///
    /// Reports [`StartOutcome::AlreadyRunning`] if a live process exists.
    /// Otherwise the tunnel is made live first, then the launch script is
    /// spawned detached inside the install path. The tunnel lock is held
    /// throughout, so starts of different servers run one at a time.
    #[tracing::instrument(skip(self, record), fields(server = %record.name))]
    pub async fn start(&self, record: &ServerRecord) -> Result<StartOutcome> {
        // Held until the handle is recorded; see `release_tunnel`.
        let mut tunnel = self.tunnel.lock().await;
        if self.is_running(&record.name).await {
            tracing::info!("Server already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let script = record.script_path();
        if !script.exists() {
            return Err(Error::LaunchFailed {
                name: record.name.clone(),
                reason: format!("launch script not found at {:?}", script),
                tunnel_started: false,
            });
        }

        let tunnel_started = self
            .ensure_tunnel_locked(&mut tunnel)
            .await
            .map_err(|e| Error::LaunchFailed {
                name: record.name.clone(),
                reason: format!("tunnel could not be launched: {}", e),
                tunnel_started: false,
            })?;

        let process = ServerProcess::spawn(&record.name, &script, &[], Some(&record.install_path))
            .map_err(|e| match e {
                Error::LaunchFailed { name, reason, .. } => Error::LaunchFailed {
                    name,
                    reason,
                    tunnel_started,
                },
                other => other,
            })
            .inspect_err(|e| tracing::error!(error = %e, tunnel_started, "Server launch failed"))?;

        let pid = process.pid();
        tracing::info!(pid, tunnel_started, "Server process spawned");

        self.servers.lock().await.insert(record.name.clone(), process);
        drop(tunnel);
        Ok(StartOutcome::Started {
            pid,
            tunnel_started,
        })
    }

    /// Spawn a server without recording a handle or touching the tunnel.
    ///
    /// The caller owns the returned process and must bring it down.
    #[tracing::instrument(skip(self, record), fields(server = %record.name))]
    pub async fn spawn_unmanaged(&self, record: &ServerRecord) -> Result<ServerProcess> {
        let script = record.script_path();
        if !script.exists() {
            return Err(Error::LaunchFailed {
                name: record.name.clone(),
                reason: format!("launch script not found at {:?}", script),
                tunnel_started: false,
            });
        }
        ServerProcess::spawn(&record.name, &script, &[], Some(&record.install_path))
    }

    /// Remove and return the live handle for `name`.
    pub async fn take(&self, name: &str) -> Option<ServerProcess> {
        let mut servers = self.servers.lock().await;
        Self::prune(&mut servers).await;
        servers.remove(name)
    }

    /// Stop a server through `strategy`, then release the tunnel if asked to
    /// or if no server remains live.
    ///
    /// With no live handle this reports [`StopOutcome::NotRunning`] and
    /// touches no server process; a tunnel orphaned by servers that exited
    /// on their own is still released. If the strategy fails, the handle is
    /// put back.
    pub async fn stop(
        &self,
        name: &str,
        release_tunnel: bool,
        strategy: &dyn ShutdownStrategy,
    ) -> Result<StopOutcome> {
        let span = tracing::info_span!("stop", server = %name, release_tunnel);
        async move {
            let Some(mut process) = self.take(name).await else {
                tracing::info!("Server not running");
                self.reap().await;
                return Ok(StopOutcome::NotRunning);
            };

            let outcome = match strategy.shut_down(&mut process).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Server could not be stopped");
                    self.servers.lock().await.insert(name.to_string(), process);
                    return Err(e);
                }
            };
            tracing::info!(?outcome, "Server stopped");

            if let Err(e) = self.release_tunnel(release_tunnel).await {
                tracing::warn!(error = %e, "Tunnel teardown failed");
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }
}
