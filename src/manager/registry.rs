use super::state::StateTable;
use crate::error::{ClusterError, Result};
use crate::service::ServiceRef;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Aggregate identity used in logs
pub const SERVICE_MANAGER_NAME: &str = "service-manager";

/// Runs an ordered set of services concurrently and aggregates their lifecycle
pub struct ServiceManager {
    pub(super) services: Mutex<Vec<ServiceRef>>,
    pub(super) started: AtomicBool,
    pub(super) states: Arc<StateTable>,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            states: Arc::new(StateTable::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        SERVICE_MANAGER_NAME
    }

    /// Register a service. Registration order is the order in which starts are initiated.
    pub fn add_service(&self, service: ServiceRef) -> Result<()> {
        let mut services = self.services.lock();
        let name = service.name().to_string();

        if self.started.load(Ordering::SeqCst) {
            return Err(ClusterError::registration(
                name,
                "service manager is already running",
            ));
        }

        if name.is_empty() {
            return Err(ClusterError::registration(name, "service name is empty"));
        }

        if services.iter().any(|existing| existing.name() == name) {
            return Err(ClusterError::registration(
                name,
                "a service with this name is already registered",
            ));
        }

        self.states.register(&name);
        services.push(service);
        debug!("Registered service '{}' with {}", name, SERVICE_MANAGER_NAME);
        Ok(())
    }

    /// Names of the registered services, in registration order
    pub fn service_names(&self) -> Vec<String> {
        self.services
            .lock()
            .iter()
            .map(|service| service.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.lock().is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}
