/// Server management module for MC Runner.
///
/// This module owns every OS process the runner creates: one detached
/// process per running server and the single tunnel process they share.
/// It also tracks the per-name lifecycle state that keeps two transitions
/// for the same server from interleaving.
///
/// # Components
///
/// * `process` - Detached spawn and process-tree kill
/// * `tunnel` - The shared tunnel process
/// * `supervisor` - Handle map, tunnel ownership, start and stop mechanics
/// * `lifecycle` - Transition states and the lifecycle event history
///
/// # Examples
///
/// Guarding a transition:
///
/// ```
/// use mc_runner::server::{ServerLifecycleManager, ServerStatus};
///
/// let manager = ServerLifecycleManager::new();
/// let guard = manager.begin("survival", ServerStatus::Starting).unwrap();
///
/// // A concurrent request for the same name is refused.
/// assert!(manager.begin("survival", ServerStatus::Stopping).is_err());
///
/// guard.commit(ServerStatus::Running).unwrap();
/// assert_eq!(manager.get_status("survival").unwrap(), ServerStatus::Running);
/// ```
pub mod lifecycle;
mod process;
mod supervisor;
mod tunnel;

pub use lifecycle::{
    EVENT_HISTORY_LIMIT, ServerEvent, ServerLifecycleEvent, ServerLifecycleManager, ServerStatus,
    TransitionGuard,
};
pub use process::{ProcessId, ServerProcess};
pub use supervisor::{ForceKill, ProcessSupervisor, ShutdownStrategy, StartOutcome, StopOutcome};
pub use tunnel::{TUNNEL_NAME, TunnelProcess};
