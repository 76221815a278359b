pub mod app;
pub mod certs;
pub mod config;
pub mod error;
pub mod latch;
pub mod manager;
pub mod notify;
pub mod service;
pub mod services;
pub mod signals;

pub use app::{RunOrchestrator, RunState};
pub use certs::{ensure_certificates, CertificateAction, CertificateAuthority, ManifestAuthority};
pub use config::{ClusterConfig, ReadinessProbe, Role, ServiceConfig};
pub use error::{ClusterError, FailurePhase, Result, ServiceFailure};
pub use latch::Latch;
pub use manager::{ServiceManager, ServiceStatus};
pub use notify::{NoopNotifier, ReadyNotifier, SystemdNotifier};
pub use service::{FnService, ReadySignal, Service, ServiceRef, ServiceState};
pub use services::ProcessService;
pub use signals::{Interrupt, InterruptSource, OsSignals};
