use super::ServiceManager;
use crate::error::Result;
use crate::service::ServiceState;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

/// Point-in-time view of one registered service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub error: Option<String>,
    pub since: DateTime<Utc>,
}

/// Per-service state, kept in registration order
#[derive(Debug, Default)]
pub(super) struct StateTable {
    entries: RwLock<Vec<ServiceStatus>>,
}

impl StateTable {
    pub(super) fn register(&self, name: &str) {
        self.entries.write().push(ServiceStatus {
            name: name.to_string(),
            state: ServiceState::Unstarted,
            error: None,
            since: Utc::now(),
        });
    }

    pub(super) fn set(&self, name: &str, state: ServiceState) {
        self.update(name, state, None);
    }

    pub(super) fn fail(&self, name: &str, error: String) {
        self.update(name, ServiceState::Failed, Some(error));
    }

    fn update(&self, name: &str, state: ServiceState, error: Option<String>) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.name == name) {
            // A stop or failure is final for this run.
            if entry.state.is_terminal() {
                return;
            }
            entry.state = state;
            entry.error = error;
            entry.since = Utc::now();
            debug!("Service '{}' state changed to: {:?}", name, state);
        }
    }

    /// Move every service that is still starting or running to `Stopping`
    pub(super) fn mark_stopping(&self) {
        let mut entries = self.entries.write();
        for entry in entries.iter_mut() {
            if matches!(entry.state, ServiceState::Starting | ServiceState::Running) {
                entry.state = ServiceState::Stopping;
                entry.since = Utc::now();
            }
        }
    }

    pub(super) fn get(&self, name: &str) -> Option<ServiceState> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.state)
    }

    pub(super) fn snapshot(&self) -> Vec<ServiceStatus> {
        self.entries.read().clone()
    }
}

impl ServiceManager {
    /// Get the state of a registered service
    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.states.get(name)
    }

    /// Get the status of every registered service, in registration order
    pub fn states(&self) -> Vec<ServiceStatus> {
        self.states.snapshot()
    }

    /// Render the current status table as JSON for logs and diagnostics
    pub fn status_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.states())?)
    }
}
