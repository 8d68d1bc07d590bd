/*!
 # MC Runner

 A Rust library for operating self-hosted Minecraft servers from a chat bot
 or any other command front-end.

 ## Overview

 MC Runner provides functionality to:
 - Start, stop and restart server processes detached from the runner
 - Share one tunnel process between every running server
 - Stop servers gracefully through the remote console, with a forced
   process-tree kill as the guaranteed fallback
 - Report live status (version, players, latency) through the status
   protocol, and online player names through the remote console
 - Keep a durable registry of named servers

 ## Basic Usage

 ```no_run
 use mc_runner::{Result, ServerRunner, Settings, StopOutcome};

 #[tokio::main]
 async fn main() -> Result<()> {
     // Read RCON_PASSWORD, CNP_SERVERS_FILE and PLAYIT_PATH
     let runner = ServerRunner::new(Settings::from_env());

     // Start a registered server; the tunnel comes up with it
     let outcome = runner.start("survival").await?;
     println!("{:?}", outcome);

     // Status never fails, it reports what it could find out
     let report = runner.status("survival").await?;
     println!("online: {}", report.is_online());

     // Stop it, keeping the tunnel for other servers
     match runner.stop("survival", false).await? {
         StopOutcome::StoppedSafely => println!("saved and stopped"),
         StopOutcome::StoppedForcibly => println!("killed"),
         StopOutcome::NotRunning => println!("was not running"),
     }

     Ok(())
 }
 ```

 Text commands, as a chat front-end would receive them:

 ```no_run
 use mc_runner::{Command, ServerRunner, Settings};

 # async fn example() -> mc_runner::Result<()> {
 let runner = ServerRunner::new(Settings::from_env());
 let command: Command = "restart survival".parse()?;

 // Each command runs on its own task so a slow server never blocks others
 let reply = runner.spawn_command(command).await.map_err(|e| mc_runner::Error::Other(e.to_string()))?;
 println!("{}", reply);
 # Ok(())
 # }
 ```

 ## Features

 - **Lifecycle**: Per-server transitions are serialized; a second request
   while one is in flight is refused
 - **Tunnel**: Launched on first start, torn down with the last server
 - **Remote console**: One authenticated command per session, always
   bounded by a timeout
 - **Status**: Status-protocol data is reported even when the console fails
 - **Registry**: Atomic writes, corrupt-file quarantine, default server
*/

pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod status;

pub use command::{Command, Reply};
pub use config::{Registry, ServerRecord, Settings, Timeouts};
pub use console::{ConsoleDiagnosis, ConsoleEndpoint, RconClient, RemoteConsole};
pub use error::{ConsoleError, Error, QueryError, Result};
pub use server::{ProcessSupervisor, ServerLifecycleManager, ServerStatus, StartOutcome, StopOutcome};
pub use status::{PlayerList, ServerReport, SlpStatusClient, StatusInfo, StatusProber, StatusSource};

use server::{ServerLifecycleEvent, ShutdownStrategy, TransitionGuard};
use shutdown::GracefulShutdown;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Outcome of a restart request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartOutcome {
    /// How the old process went away; `NotRunning` is fine
    pub stopped: StopOutcome,
    /// How the new process came up
    pub started: StartOutcome,
}

/// Outcome of a warm-up run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmUpOutcome {
    /// The server ran for the warm-up period and was brought down
    Completed {
        /// Whether the process tree had to be killed afterwards
        forced: bool,
    },
    /// A managed process is live; nothing was done
    AlreadyRunning,
}

/// One line of the server list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSummary {
    /// Server name
    pub name: String,
    /// Whether a managed process is live
    pub running: bool,
    /// Whether this is the default server
    pub is_default: bool,
    /// Lifecycle state
    pub status: ServerStatus,
}

struct RunnerInner {
    /// Settings and secrets
    settings: Settings,
    /// Registered servers
    registry: RwLock<Registry>,
    /// Process owner
    supervisor: ProcessSupervisor,
    /// Transition states and history
    lifecycle: ServerLifecycleManager,
    /// Remote console used for shutdown and diagnosis
    console: Arc<dyn RemoteConsole>,
    /// Status and player-list prober
    prober: StatusProber,
}

/// Orchestrates the lifecycle of registered servers.
///
/// This struct is the main entry point. It is cheap to clone; clones share
/// the same processes, registry and tunnel, so each inbound command can be
/// dispatched onto its own task with [`spawn_command`](Self::spawn_command).
/// All public lifecycle methods are instrumented with `tracing` spans.
#[derive(Clone)]
pub struct ServerRunner {
    inner: Arc<RunnerInner>,
}

impl ServerRunner {
    /// Create a runner from the process environment
    pub fn from_env() -> Self {
        Self::new(Settings::from_env())
    }

    /// Create a runner from a JSON settings file, with environment overrides
    #[tracing::instrument(skip(path), fields(settings_path = ?path.as_ref()))]
    pub fn from_settings_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading settings from file");
        let settings = Settings::from_file(path)?.apply_env();
        Ok(Self::new(settings))
    }

    /// Create a runner with the network clients, opening the registry named
    /// in `settings`
    pub fn new(settings: Settings) -> Self {
        let registry = Registry::open(&settings.registry_path);
        Self::with_clients(
            settings,
            registry,
            Arc::new(RconClient::new()),
            Arc::new(SlpStatusClient::new()),
        )
    }

    /// Create a runner over explicit collaborators
    #[tracing::instrument(skip_all, fields(num_servers = registry.len()))]
    pub fn with_clients(
        settings: Settings,
        registry: Registry,
        console: Arc<dyn RemoteConsole>,
        status: Arc<dyn StatusSource>,
    ) -> Self {
        tracing::info!("Creating new ServerRunner");
        let supervisor = ProcessSupervisor::new(settings.tunnel.clone(), &settings.timeouts);
        let prober = StatusProber::new(status, console.clone());

        Self {
            inner: Arc::new(RunnerInner {
                settings,
                registry: RwLock::new(registry),
                supervisor,
                lifecycle: ServerLifecycleManager::new(),
                console,
                prober,
            }),
        }
    }

    /// Settings in use
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// The process supervisor
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.inner.supervisor
    }

    /// Transition states and lifecycle history
    pub fn lifecycle(&self) -> &ServerLifecycleManager {
        &self.inner.lifecycle
    }

    fn registry(&self) -> Result<RwLockReadGuard<'_, Registry>> {
        self.inner
            .registry
            .read()
            .map_err(|_| Error::Other("Failed to lock registry".to_string()))
    }

    fn registry_mut(&self) -> Result<RwLockWriteGuard<'_, Registry>> {
        self.inner
            .registry
            .write()
            .map_err(|_| Error::Other("Failed to lock registry".to_string()))
    }

    /// Registered record for `name`
    pub fn record(&self, name: &str) -> Result<ServerRecord> {
        self.registry()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))
    }

    /// Resolve an optional name: explicit, then default, then sole server
    pub fn resolve(&self, name: Option<&str>) -> Result<String> {
        self.registry()?.resolve(name)
    }

    /// Registered server names, sorted
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.registry()?.names())
    }

    /// Register or replace a server. Returns `true` if one was replaced.
    pub fn register(&self, record: ServerRecord) -> Result<bool> {
        self.registry_mut()?.add(record)
    }

    /// Remove a server from the registry.
    ///
    /// Refused while the server has a live process.
    pub async fn unregister(&self, name: &str) -> Result<bool> {
        if self.inner.supervisor.is_running(name).await {
            return Err(Error::Busy(name.to_string()));
        }
        self.registry_mut()?.remove(name)
    }

    /// Make `name` the default server.
    #[tracing::instrument(skip(self))]
    pub fn set_default(&self, name: &str) -> Result<()> {
        if self.registry_mut()?.set_default(name)? {
            tracing::info!("Default server changed");
            Ok(())
        } else {
            Err(Error::ServerNotFound(name.to_string()))
        }
    }

    fn record_event(&self, name: &str, event: ServerLifecycleEvent, details: Option<String>) {
        if let Err(e) = self.inner.lifecycle.record_event(name, event, details) {
            tracing::warn!(error = %e, "Failed to record lifecycle event");
        }
    }

    /// Settle a `Running` state whose process exited on its own.
    ///
    /// Runs as its own short transition, so it is skipped while another one
    /// is in flight and never races a concurrent start.
    async fn settle_exited(&self, name: &str) {
        match self.inner.lifecycle.get_status(name) {
            Ok(ServerStatus::Running) => {}
            _ => return,
        }
        let Ok(guard) = self.inner.lifecycle.begin(name, ServerStatus::Stopping) else {
            return;
        };
        if guard.previous() != ServerStatus::Running || self.inner.supervisor.is_running(name).await {
            return;
        }

        match guard.commit(ServerStatus::Stopped) {
            Ok(()) => self.record_event(
                name,
                ServerLifecycleEvent::Stopped,
                Some("exited on its own".to_string()),
            ),
            Err(e) => tracing::warn!(server = %name, error = %e, "Failed to update server state"),
        }
    }

    fn shutdown_policy<'a>(&'a self, record: &ServerRecord) -> GracefulShutdown<'a> {
        GracefulShutdown::new(
            self.inner.console.as_ref(),
            record.console_endpoint(),
            self.inner.settings.console_password(),
            &self.inner.settings.timeouts,
        )
    }

    /// Start a registered server.
    ///
    /// Reports [`StartOutcome::AlreadyRunning`] when a live process exists.
    /// Fails with [`Error::Busy`] while another transition for the same name
    /// is in flight.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn start(&self, name: &str) -> Result<StartOutcome> {
        let guard = self.inner.lifecycle.begin(name, ServerStatus::Starting)?;
        self.start_guarded(guard).await
    }

    async fn start_guarded(&self, guard: TransitionGuard<'_>) -> Result<StartOutcome> {
        let name = guard.name().to_string();
        if self.inner.supervisor.is_running(&name).await {
            guard.commit(ServerStatus::Running)?;
            return Ok(StartOutcome::AlreadyRunning);
        }

        let record = self.record(&name)?;
        match self.inner.supervisor.start(&record).await {
            Ok(outcome) => {
                guard.commit(ServerStatus::Running)?;
                if let StartOutcome::Started { pid, .. } = outcome {
                    self.record_event(&name, ServerLifecycleEvent::Started, Some(format!("pid {}", pid)));
                }
                Ok(outcome)
            }
            Err(e) => {
                // Nothing runs under this name now, whatever the state was.
                if let Err(commit_error) = guard.commit(ServerStatus::Stopped) {
                    tracing::warn!(error = %commit_error, "Failed to update server state");
                }
                self.record_event(&name, ServerLifecycleEvent::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop a server: console shutdown first, process-tree kill as fallback.
    ///
    /// The tunnel is torn down when `release_tunnel` is set or when this was
    /// the last live server.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn stop(&self, name: &str, release_tunnel: bool) -> Result<StopOutcome> {
        let guard = self.inner.lifecycle.begin(name, ServerStatus::Stopping)?;
        let outcome = self.stop_guarded(name, release_tunnel).await?;
        guard.commit(ServerStatus::Stopped)?;
        Ok(outcome)
    }

    async fn stop_guarded(&self, name: &str, release_tunnel: bool) -> Result<StopOutcome> {
        // An unregistered name can still own a process if it was removed
        // while running; fall back to a default console endpoint.
        let record = self
            .record(name)
            .unwrap_or_else(|_| ServerRecord::new(name, "."));
        let policy = self.shutdown_policy(&record);

        match self.inner.supervisor.stop(name, release_tunnel, &policy).await {
            Ok(outcome) => {
                if outcome != StopOutcome::NotRunning {
                    self.record_event(name, ServerLifecycleEvent::Stopped, Some(format!("{:?}", outcome)));
                }
                Ok(outcome)
            }
            Err(e) => {
                self.record_event(name, ServerLifecycleEvent::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop (keeping the tunnel), settle, then start.
    ///
    /// A server that was not running is simply started.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn restart(&self, name: &str) -> Result<RestartOutcome> {
        // Fail on unknown names before touching anything.
        self.record(name)?;

        let mut guard = self.inner.lifecycle.begin(name, ServerStatus::Stopping)?;
        let stopped = self.stop_guarded(name, false).await?;

        tracing::debug!(settle = ?self.inner.settings.timeouts.restart_settle, "Waiting before start");
        tokio::time::sleep(self.inner.settings.timeouts.restart_settle).await;

        guard.advance(ServerStatus::Starting)?;
        let started = self.start_guarded(guard).await?;

        self.record_event(name, ServerLifecycleEvent::Restarted, None);
        tracing::info!(?stopped, ?started, "Server restarted");
        Ok(RestartOutcome { stopped, started })
    }

    /// Status-protocol report plus best-effort player names.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn status(&self, name: &str) -> Result<ServerReport> {
        let record = self.record(name)?;
        let managed = self.inner.supervisor.is_running(name).await;
        if !managed {
            self.settle_exited(name).await;
        }

        Ok(self
            .inner
            .prober
            .report(
                &record,
                managed,
                self.inner.settings.console_password(),
                &self.inner.settings.timeouts,
            )
            .await)
    }

    /// Every registered server with its running flag and default marker.
    ///
    /// Servers found to have exited on their own are settled as stopped,
    /// and a tunnel with no live server left is released.
    pub async fn list(&self) -> Result<Vec<ServerSummary>> {
        let (names, default) = {
            let registry = self.registry()?;
            (registry.names(), registry.default_server().map(str::to_string))
        };
        let running = self.inner.supervisor.running_names().await;
        if running.is_empty() {
            self.inner.supervisor.reap().await;
        }

        let mut summaries = Vec::with_capacity(names.len());
        for name in names {
            let is_running = running.contains(&name);
            if !is_running {
                self.settle_exited(&name).await;
            }
            summaries.push(ServerSummary {
                running: is_running,
                is_default: default.as_deref() == Some(name.as_str()),
                status: self.inner.lifecycle.get_status(&name)?,
                name,
            });
        }
        Ok(summaries)
    }

    /// Check the console of a server and explain a failure.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn check_console(&self, name: &str) -> Result<ConsoleDiagnosis> {
        let record = self.record(name)?;
        Ok(console::diagnose(
            self.inner.console.as_ref(),
            &record,
            self.inner.settings.console_password(),
            &self.inner.settings.timeouts,
        )
        .await)
    }

    /// Run a server once so it generates its world files, then bring it
    /// down.
    ///
    /// No tunnel is launched and no handle is kept. Killing the process at
    /// the end is cleanup, reported through `forced`.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn warm_up(&self, name: &str) -> Result<WarmUpOutcome> {
        let mut guard = self.inner.lifecycle.begin(name, ServerStatus::Starting)?;
        if self.inner.supervisor.is_running(name).await {
            return Ok(WarmUpOutcome::AlreadyRunning);
        }

        let record = self.record(name)?;
        let mut process = self
            .inner
            .supervisor
            .spawn_unmanaged(&record)
            .await
            .inspect_err(|e| {
                self.record_event(name, ServerLifecycleEvent::Failed, Some(e.to_string()))
            })?;

        tracing::info!(pid = process.pid(), duration = ?self.inner.settings.timeouts.warm_up, "Warm-up run started");
        tokio::time::sleep(self.inner.settings.timeouts.warm_up).await;

        guard.advance(ServerStatus::Stopping)?;
        let policy = self.shutdown_policy(&record);
        let outcome = policy.shut_down(&mut process).await?;
        guard.commit(ServerStatus::Stopped)?;

        let forced = outcome == StopOutcome::StoppedForcibly;
        tracing::info!(forced, "Warm-up run finished");
        Ok(WarmUpOutcome::Completed { forced })
    }

    /// Stop every managed server and tear the tunnel down.
    ///
    /// Returns the outcome per server; one failure does not stop the rest.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown_all(&self) -> Vec<(String, Result<StopOutcome>)> {
        let names = self.inner.supervisor.running_names().await;
        tracing::info!(count = names.len(), "Stopping all servers");

        let stops = names.iter().map(|name| self.stop(name, false));
        let outcomes = futures::future::join_all(stops).await;

        if let Err(e) = self.inner.supervisor.release_tunnel(true).await {
            tracing::warn!(error = %e, "Tunnel teardown failed");
        }

        names.into_iter().zip(outcomes).collect()
    }

    /// Run one command and render its outcome.
    ///
    /// Every command yields exactly one reply; errors become failed replies.
    pub async fn execute(&self, command: Command) -> Reply {
        tracing::debug!(?command, "Executing command");
        let result = match &command {
            Command::Start { name } => self
                .start(name)
                .await
                .map(|outcome| Reply::started(name, outcome)),
            Command::Stop {
                name,
                release_tunnel,
            } => match self.resolve(name.as_deref()) {
                Ok(name) => self
                    .stop(&name, *release_tunnel)
                    .await
                    .map(|outcome| Reply::stopped(&name, outcome)),
                Err(e) => Err(e),
            },
            Command::Restart { name } => match self.resolve(name.as_deref()) {
                Ok(name) => self
                    .restart(&name)
                    .await
                    .map(|outcome| Reply::restarted(&name, outcome)),
                Err(e) => Err(e),
            },
            Command::Status { name } => match self.resolve(name.as_deref()) {
                Ok(name) => self.status(&name).await.map(|report| Reply::status(&report)),
                Err(e) => Err(e),
            },
            Command::List => self.list().await.map(|servers| Reply::list(&servers)),
            Command::CheckConsole { name } => match self.resolve(name.as_deref()) {
                Ok(name) => self
                    .check_console(&name)
                    .await
                    .map(|diagnosis| Reply::console(&name, &diagnosis)),
                Err(e) => Err(e),
            },
            Command::WarmUp { name } => self
                .warm_up(name)
                .await
                .map(|outcome| Reply::warmed_up(name, outcome)),
            Command::SetDefault { name } => self
                .set_default(name)
                .map(|()| Reply::ok(format!("Default server is now '{}'.", name))),
        };

        result.unwrap_or_else(|e| {
            tracing::warn!(?command, error = %e, "Command failed");
            Reply::from_error(&e)
        })
    }

    /// Run a command on its own task.
    pub fn spawn_command(&self, command: Command) -> tokio::task::JoinHandle<Reply> {
        let runner = self.clone();
        tokio::spawn(async move { runner.execute(command).await })
    }
}
