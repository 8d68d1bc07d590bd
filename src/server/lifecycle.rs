use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;

/// Most events kept in the history
pub const EVENT_HISTORY_LIMIT: usize = 1000;

/// Lifecycle state of one server name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerStatus {
    /// No process
    #[default]
    Stopped,
    /// Start in flight
    Starting,
    /// Process spawned
    Running,
    /// Stop in flight
    Stopping,
}

impl ServerStatus {
    /// Whether a transition is in flight
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLifecycleEvent {
    /// Server started
    Started,
    /// Server stopped
    Stopped,
    /// Start, stop or warm-up failed
    Failed,
    /// Server restarted
    Restarted,
}

/// Server lifecycle event
#[derive(Debug, Clone)]
pub struct ServerEvent {
    /// Server name
    pub name: String,
    /// Event type
    pub event: ServerLifecycleEvent,
    /// Event timestamp
    pub timestamp: SystemTime,
    /// Event details
    pub details: Option<String>,
}

/// Tracks per-name transition state and a bounded event history.
///
/// A transition is opened with [`begin`](Self::begin), which refuses while
/// another transition for the same name is in flight. Locks are never held
/// across an `.await`.
#[derive(Debug, Default)]
pub struct ServerLifecycleManager {
    /// Server events, oldest first
    events: Mutex<VecDeque<ServerEvent>>,
    /// Server statuses
    statuses: Mutex<HashMap<String, ServerStatus>>,
}

impl ServerLifecycleManager {
    /// Create a new server lifecycle manager
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_statuses(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ServerStatus>>> {
        self.statuses
            .lock()
            .map_err(|_| Error::Other("Failed to lock server statuses".to_string()))
    }

    /// Open a transition for `name`.
    ///
    /// Fails with [`Error::Busy`] if `name` is already starting or stopping.
    /// Dropping the guard without [`commit`](TransitionGuard::commit)
    /// restores the previous state.
    pub fn begin(&self, name: &str, transition: ServerStatus) -> Result<TransitionGuard<'_>> {
        let mut statuses = self.lock_statuses()?;
        let previous = statuses.get(name).copied().unwrap_or_default();
        if previous.is_transient() {
            return Err(Error::Busy(name.to_string()));
        }

        statuses.insert(name.to_string(), transition);
        tracing::debug!(server = %name, from = %previous, to = %transition, "Transition opened");

        Ok(TransitionGuard {
            manager: self,
            name: name.to_string(),
            previous,
            committed: false,
        })
    }

    /// Get server status; names never seen are `Stopped`
    pub fn get_status(&self, name: &str) -> Result<ServerStatus> {
        Ok(self
            .lock_statuses()?
            .get(name)
            .copied()
            .unwrap_or_default())
    }

    fn set_status(&self, name: &str, status: ServerStatus) -> Result<()> {
        self.lock_statuses()?.insert(name.to_string(), status);
        Ok(())
    }

    /// Record a server event
    pub fn record_event(
        &self,
        name: &str,
        event: ServerLifecycleEvent,
        details: Option<String>,
    ) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        events.push_back(ServerEvent {
            name: name.to_string(),
            event,
            timestamp: SystemTime::now(),
            details,
        });
        while events.len() > EVENT_HISTORY_LIMIT {
            events.pop_front();
        }

        Ok(())
    }

    /// Get recent events for a server, newest first
    pub fn get_server_events(&self, name: &str, limit: Option<usize>) -> Result<Vec<ServerEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        Ok(events
            .iter()
            .rev()
            .filter(|e| e.name == name)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Get all events, newest first
    pub fn get_all_events(&self, limit: Option<usize>) -> Result<Vec<ServerEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        Ok(events
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Clear events
    pub fn clear_events(&self) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?
            .clear();
        Ok(())
    }
}

/// An in-flight transition for one server name.
#[derive(Debug)]
pub struct TransitionGuard<'a> {
    manager: &'a ServerLifecycleManager,
    name: String,
    previous: ServerStatus,
    committed: bool,
}

impl TransitionGuard<'_> {
    /// Server name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State before the transition opened
    pub fn previous(&self) -> ServerStatus {
        self.previous
    }

    /// Move to another transient state without closing the transition.
    pub fn advance(&mut self, status: ServerStatus) -> Result<()> {
        self.manager.set_status(&self.name, status)
    }

    /// Close the transition in `status`.
    pub fn commit(mut self, status: ServerStatus) -> Result<()> {
        self.committed = true;
        self.manager.set_status(&self.name, status)
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = self.manager.set_status(&self.name, self.previous) {
            tracing::error!(server = %self.name, error = %e, "Could not restore server state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_transition_is_busy() {
        let manager = ServerLifecycleManager::new();
        let _guard = manager.begin("survival", ServerStatus::Starting).unwrap();

        let err = manager.begin("survival", ServerStatus::Stopping).unwrap_err();
        assert!(matches!(err, Error::Busy(name) if name == "survival"));

        // other names are independent
        assert!(manager.begin("creative", ServerStatus::Starting).is_ok());
    }

    #[test]
    fn dropped_guard_restores_previous_state() {
        let manager = ServerLifecycleManager::new();
        {
            let _guard = manager.begin("survival", ServerStatus::Starting).unwrap();
            assert_eq!(manager.get_status("survival").unwrap(), ServerStatus::Starting);
        }
        assert_eq!(manager.get_status("survival").unwrap(), ServerStatus::Stopped);
    }

    #[test]
    fn committed_guard_keeps_new_state() {
        let manager = ServerLifecycleManager::new();
        let mut guard = manager.begin("survival", ServerStatus::Stopping).unwrap();
        guard.advance(ServerStatus::Starting).unwrap();
        assert_eq!(manager.get_status("survival").unwrap(), ServerStatus::Starting);

        guard.commit(ServerStatus::Running).unwrap();
        assert_eq!(manager.get_status("survival").unwrap(), ServerStatus::Running);
        assert!(manager.begin("survival", ServerStatus::Stopping).is_ok());
    }

    #[test]
    fn guard_remembers_previous_state() {
        let manager = ServerLifecycleManager::new();
        manager
            .begin("survival", ServerStatus::Starting)
            .unwrap()
            .commit(ServerStatus::Running)
            .unwrap();

        let guard = manager.begin("survival", ServerStatus::Stopping).unwrap();
        assert_eq!(guard.previous(), ServerStatus::Running);
        guard.commit(ServerStatus::Stopped).unwrap();

        let guard = manager.begin("survival", ServerStatus::Starting).unwrap();
        assert_eq!(guard.previous(), ServerStatus::Stopped);
    }

    #[test]
    fn event_history_is_bounded_and_newest_first() {
        let manager = ServerLifecycleManager::new();
        for i in 0..(EVENT_HISTORY_LIMIT + 5) {
            manager
                .record_event("survival", ServerLifecycleEvent::Started, Some(i.to_string()))
                .unwrap();
        }
        manager
            .record_event("creative", ServerLifecycleEvent::Failed, None)
            .unwrap();

        let all = manager.get_all_events(None).unwrap();
        assert_eq!(all.len(), EVENT_HISTORY_LIMIT);
        assert_eq!(all[0].name, "creative");

        let survival = manager.get_server_events("survival", Some(2)).unwrap();
        assert_eq!(survival.len(), 2);
        assert_eq!(survival[0].details.as_deref(), Some("1004"));

        manager.clear_events().unwrap();
        assert!(manager.get_all_events(None).unwrap().is_empty());
    }
}
