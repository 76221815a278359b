use super::types::RunState;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::manager::ServiceManager;
use crate::notify::{ReadyNotifier, SystemdNotifier};
use crate::service::ServiceRef;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Top-level driver: prepares the host, registers services by role, runs the
/// service manager and turns interrupts into a graceful, bounded shutdown
pub struct RunOrchestrator {
    pub(super) config: ClusterConfig,
    pub(super) manager: Arc<ServiceManager>,
    pub(super) cancellation_token: CancellationToken,
    pub(super) grace_period: Duration,
    pub(super) notifier: Box<dyn ReadyNotifier>,
    pub(super) state: RunState,
}

impl RunOrchestrator {
    /// Create a new orchestrator with the given configuration
    pub fn new(config: ClusterConfig) -> Self {
        let grace_period = config.grace_period();
        Self {
            config,
            manager: Arc::new(ServiceManager::new()),
            cancellation_token: CancellationToken::new(),
            grace_period,
            notifier: Box::new(SystemdNotifier::from_env()),
            state: RunState::WaitingForReady,
        }
    }

    /// Replace the supervisor notifier
    pub fn with_notifier(mut self, notifier: Box<dyn ReadyNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Override the configured grace period
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ServiceManager> {
        &self.manager
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Current state of the run state machine
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Register an additional service ahead of [`RunOrchestrator::run`]
    pub fn add_service(&self, service: ServiceRef) -> Result<()> {
        self.manager.add_service(service)
    }
}
