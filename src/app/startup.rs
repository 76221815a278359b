use super::RunOrchestrator;
use crate::certs::{ensure_certificates, CertificateAction, CertificateAuthority};
use crate::config::{ClusterConfig, Role};
use crate::error::{ClusterError, Result};
use crate::services::ProcessService;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const NO_PROXY_VARS: [&str; 2] = ["NO_PROXY", "no_proxy"];

impl RunOrchestrator {
    /// Run the startup gates that must pass before any service is registered.
    ///
    /// Order: privilege check, private directories, certificates. The proxy
    /// environment is set earlier by [`export_no_proxy`].
    pub async fn prepare(&self, ca: &dyn CertificateAuthority) -> Result<CertificateAction> {
        info!("Preparing host for roles {:?}", self.config.roles);

        check_privileges(&self.config, effective_uid())?;

        create_private_dir(&self.config.data_dir)?;
        create_private_dir(&self.config.audit_log_dir)?;

        ensure_certificates(&self.config.certs_dir(), ca).await
    }

    /// Register the configured process services for the active roles.
    ///
    /// Returns the number of services registered.
    pub fn register_configured_services(&self) -> Result<usize> {
        let services = self.config.services_for_roles();
        for service in &services {
            info!("Registering service '{}'", service.name);
            self.manager
                .add_service(Arc::new(ProcessService::new((*service).clone())))?;
        }
        Ok(services.len())
    }
}

/// The `node` role manages host networking and needs root.
pub fn check_privileges(config: &ClusterConfig, euid: u32) -> Result<()> {
    if config.has_role(Role::Node) && euid != 0 {
        return Err(ClusterError::Privilege {
            message: format!("role '{}' must be run as root (euid {})", Role::Node, euid),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn effective_uid() -> u32 {
    // SAFETY: geteuid(2) cannot fail and has no preconditions.
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn effective_uid() -> u32 {
    0
}

/// Hosts and networks cluster-internal traffic must not be proxied for
pub fn no_proxy_entries(config: &ClusterConfig) -> Vec<String> {
    vec![
        config.node_ip.clone(),
        config.node_name.clone(),
        config.cluster.cluster_cidr.clone(),
        config.cluster.service_cidr.clone(),
        ".svc".to_string(),
        format!(".{}", config.cluster.domain),
    ]
}

/// Add the cluster's internal hosts and networks to `NO_PROXY` and `no_proxy`.
///
/// Call this before the async runtime starts: it mutates the process
/// environment, which is only sound while no other thread reads it.
pub fn export_no_proxy(config: &ClusterConfig) {
    let entries = no_proxy_entries(config);
    for var in NO_PROXY_VARS {
        let existing = env::var(var).unwrap_or_default();
        let merged = merge_no_proxy(&existing, &entries);
        debug!("Setting {}={}", var, merged);
        env::set_var(var, merged);
    }
}

/// Append `entries` to a comma separated no-proxy list, skipping duplicates and blanks
pub fn merge_no_proxy(existing: &str, entries: &[String]) -> String {
    let mut merged: Vec<String> = existing
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect();

    for entry in entries {
        let entry = entry.trim();
        if !entry.is_empty() && !merged.iter().any(|existing| existing == entry) {
            merged.push(entry.to_string());
        }
    }

    merged.join(",")
}

/// Create `path` (and parents) readable only by the owner
pub fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;
    debug!("Ensured directory {}", path.display());
    Ok(())
}
