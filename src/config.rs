use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClusterConfig {
    /// Name this node registers under
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Address other cluster members reach this node on
    #[serde(default = "default_node_ip")]
    pub node_ip: String,

    /// Directory for runtime data (certificates, service state)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory for API audit logs
    #[serde(default = "default_audit_log_dir")]
    pub audit_log_dir: PathBuf,

    /// Roles of this instance
    #[serde(default = "default_roles")]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub cluster: NetworkConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Supervised services, in start order
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    /// Pod network CIDR
    #[serde(default = "default_cluster_cidr")]
    pub cluster_cidr: String,

    /// Service network CIDR
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,

    /// Cluster DNS domain
    #[serde(default = "default_domain")]
    pub domain: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ShutdownConfig {
    /// Time allowed for services to stop before the process exits anyway
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Unique service name
    pub name: String,

    /// Roles that activate this service
    #[serde(default)]
    pub roles: Vec<Role>,

    /// Executable to run
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the command as `KEY=VALUE` entries
    #[serde(default)]
    pub env: Vec<String>,

    /// How to decide the service is ready
    #[serde(default)]
    pub readiness: ReadinessProbe,

    /// Time between SIGTERM and SIGKILL when stopping
    #[serde(default = "default_stop_timeout_seconds")]
    pub stop_timeout_seconds: u64,
}

/// A named capability set selecting which services run on this instance
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "control-plane")]
    Controlplane,
    Node,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Controlplane => "controlplane",
            Role::Node => "node",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "controlplane" | "control-plane" => Ok(Role::Controlplane),
            "node" => Ok(Role::Node),
            other => Err(ConfigError::Message(format!("Unknown role '{}'", other))),
        }
    }
}

/// Readiness check performed by a process service after spawning its command
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReadinessProbe {
    /// Ready as soon as the process is spawned
    #[default]
    Immediate,
    /// Ready after a fixed delay
    Delay { millis: u64 },
    /// Ready once a TCP connection to `address` succeeds
    Tcp { address: String },
    /// Ready once `path` exists
    File { path: PathBuf },
}

impl ClusterConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("node_name", default_node_name())?
            .set_default("node_ip", default_node_ip())?
            .set_default("data_dir", default_data_dir().to_string_lossy().to_string())?
            .set_default(
                "audit_log_dir",
                default_audit_log_dir().to_string_lossy().to_string(),
            )?
            .set_default("cluster.cluster_cidr", default_cluster_cidr())?
            .set_default("cluster.service_cidr", default_service_cidr())?
            .set_default("cluster.domain", default_domain())?
            .set_default(
                "shutdown.grace_period_seconds",
                default_grace_period_seconds(),
            )?
            // Configuration file is optional; defaults cover a single-node install
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables with CLUSTERD_ prefix, e.g. CLUSTERD_SHUTDOWN__GRACE_PERIOD_SECONDS.
            // CLUSTERD_ROLES takes a comma separated list.
            .add_source(
                Environment::with_prefix("CLUSTERD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("roles"),
            )
            .build()?;

        let config: ClusterConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Apply command-line overrides, which take precedence over file and environment
    pub fn apply_overrides(
        &mut self,
        data_dir: Option<PathBuf>,
        audit_log_dir: Option<PathBuf>,
        roles: Option<Vec<Role>>,
    ) {
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }
        if let Some(audit_log_dir) = audit_log_dir {
            self.audit_log_dir = audit_log_dir;
        }
        if let Some(roles) = roles {
            self.roles = roles;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roles.is_empty() {
            return Err(ConfigError::Message(
                "At least one role must be selected".to_string(),
            ));
        }

        if self.node_name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Node name must not be empty".to_string(),
            ));
        }

        if self.node_ip.parse::<IpAddr>().is_err() {
            return Err(ConfigError::Message(format!(
                "Node IP '{}' is not a valid IP address",
                self.node_ip
            )));
        }

        if self.shutdown.grace_period_seconds == 0 {
            return Err(ConfigError::Message(
                "Shutdown grace_period_seconds must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Service name must not be empty".to_string(),
                ));
            }
            if !names.insert(service.name.as_str()) {
                return Err(ConfigError::Message(format!(
                    "Service '{}' is defined more than once",
                    service.name
                )));
            }
            if service.command.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "Service '{}' has no command",
                    service.name
                )));
            }
            if let Some(entry) = service.env.iter().find(|entry| !entry.contains('=')) {
                return Err(ConfigError::Message(format!(
                    "Service '{}' has malformed env entry '{}', expected KEY=VALUE",
                    service.name, entry
                )));
            }
            if service.roles.is_empty() {
                return Err(ConfigError::Message(format!(
                    "Service '{}' must belong to at least one role",
                    service.name
                )));
            }
        }

        Ok(())
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Services to register for the active roles.
    ///
    /// Control-plane services come first, then node services, each in file order.
    /// A service listed under several active roles is returned once.
    pub fn services_for_roles(&self) -> Vec<&ServiceConfig> {
        let mut selected: Vec<&ServiceConfig> = Vec::new();
        for role in [Role::Controlplane, Role::Node] {
            if !self.has_role(role) {
                continue;
            }
            for service in &self.services {
                if service.roles.contains(&role)
                    && !selected.iter().any(|chosen| chosen.name == service.name)
                {
                    selected.push(service);
                }
            }
        }
        selected
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_period_seconds)
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.data_dir.join("certs")
    }
}

impl ServiceConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    /// Environment entries split into key/value pairs
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|entry| entry.split_once('='))
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            node_ip: default_node_ip(),
            data_dir: default_data_dir(),
            audit_log_dir: default_audit_log_dir(),
            roles: default_roles(),
            cluster: NetworkConfig::default(),
            shutdown: ShutdownConfig::default(),
            services: Vec::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cluster_cidr: default_cluster_cidr(),
            service_cidr: default_service_cidr(),
            domain: default_domain(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: default_grace_period_seconds(),
        }
    }
}

// Default value functions
fn default_node_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
fn default_node_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/clusterd")
}
fn default_audit_log_dir() -> PathBuf {
    PathBuf::from("/var/log/clusterd")
}
fn default_roles() -> Vec<Role> {
    vec![Role::Controlplane, Role::Node]
}

fn default_cluster_cidr() -> String {
    "10.42.0.0/16".to_string()
}
fn default_service_cidr() -> String {
    "10.43.0.0/16".to_string()
}
fn default_domain() -> String {
    "cluster.local".to_string()
}

fn default_grace_period_seconds() -> u64 {
    60
}
fn default_stop_timeout_seconds() -> u64 {
    10
}
