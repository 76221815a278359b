use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Registration error for service '{service}': {reason}")]
    Registration { service: String, reason: String },

    #[error("Service '{service}' failed to start: {message}")]
    Startup { service: String, message: String },

    #[error("{}", format_failures(.failures))]
    ServiceFailures { failures: Vec<ServiceFailure> },

    #[error("Service error in {service}: {message}")]
    Service { service: String, message: String },

    #[error("Insufficient privileges: {message}")]
    Privilege { message: String },

    #[error("Certificate error: {message}")]
    Certificate { message: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl ClusterError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn service<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn registration<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::Registration {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn certificate<S: Into<String>>(message: S) -> Self {
        Self::Certificate {
            message: message.into(),
        }
    }

    /// Name of the service a startup failure is attributed to, if any
    pub fn failed_service(&self) -> Option<&str> {
        match self {
            Self::Startup { service, .. } | Self::Service { service, .. } => Some(service),
            _ => None,
        }
    }
}

/// Phase in which a managed service returned an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    Startup,
    Runtime,
    Shutdown,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Runtime => write!(f, "runtime"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A single service failure recorded by the service manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFailure {
    pub service: String,
    pub phase: FailurePhase,
    pub message: String,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.service, self.phase, self.message)
    }
}

fn format_failures(failures: &[ServiceFailure]) -> String {
    let details: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!("{} service(s) failed: {}", failures.len(), details.join("; "))
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_failures_name_every_service() {
        let err = ClusterError::ServiceFailures {
            failures: vec![
                ServiceFailure {
                    service: "kubelet".to_string(),
                    phase: FailurePhase::Runtime,
                    message: "exited with status 1".to_string(),
                },
                ServiceFailure {
                    service: "kube-proxy".to_string(),
                    phase: FailurePhase::Shutdown,
                    message: "did not flush rules".to_string(),
                },
            ],
        };

        let text = err.to_string();
        assert!(text.starts_with("2 service(s) failed"));
        assert!(text.contains("kubelet (runtime)"));
        assert!(text.contains("kube-proxy (shutdown)"));
    }

    #[test]
    fn test_failed_service_attribution() {
        let err = ClusterError::Startup {
            service: "etcd".to_string(),
            message: "address in use".to_string(),
        };
        assert_eq!(err.failed_service(), Some("etcd"));
        assert!(err.to_string().contains("etcd"));
        assert_eq!(ClusterError::system("boom").failed_service(), None);
    }
}
