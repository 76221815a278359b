//! Certificate bootstrap gate run once before any service is registered.

use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "ca.toml";

/// Creates and loads the cluster's certificate material
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Create all certificate material under `certs_dir`
    async fn initialize(&self, certs_dir: &Path) -> Result<()>;

    /// Load existing material from `certs_dir`
    async fn load(&self, certs_dir: &Path) -> Result<()>;
}

/// What [`ensure_certificates`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateAction {
    Initialized,
    Loaded,
    Reinitialized,
}

/// Make sure usable certificate material exists in `certs_dir`.
///
/// A missing directory is initialized from scratch. Material that exists but
/// fails to load is deleted and initialized again.
pub async fn ensure_certificates(
    certs_dir: &Path,
    ca: &dyn CertificateAuthority,
) -> Result<CertificateAction> {
    if !tokio::fs::try_exists(certs_dir).await? {
        info!("No certificates found in {}, initializing", certs_dir.display());
        ca.initialize(certs_dir).await?;
        return Ok(CertificateAction::Initialized);
    }

    match ca.load(certs_dir).await {
        Ok(()) => {
            info!("Loaded certificates from {}", certs_dir.display());
            Ok(CertificateAction::Loaded)
        }
        Err(e) => {
            warn!(
                "Failed to load certificates from {}: {}; regenerating",
                certs_dir.display(),
                e
            );
            if let Err(e) = tokio::fs::remove_dir_all(certs_dir).await {
                error!(
                    "Removing old certificates directory {}: {}",
                    certs_dir.display(),
                    e
                );
            }
            ca.initialize(certs_dir).await?;
            Ok(CertificateAction::Reinitialized)
        }
    }
}

/// Manifest describing the cluster CA
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaManifest {
    pub serial: String,
    pub common_name: String,
    pub issued_at: DateTime<Utc>,
}

/// Built-in authority that lays out the certificates directory and records
/// the CA identity in a manifest
#[derive(Debug, Clone)]
pub struct ManifestAuthority {
    common_name: String,
}

impl ManifestAuthority {
    pub fn new<S: Into<String>>(common_name: S) -> Self {
        Self {
            common_name: common_name.into(),
        }
    }

    fn manifest_path(certs_dir: &Path) -> PathBuf {
        certs_dir.join(MANIFEST_FILE)
    }

    pub async fn read_manifest(certs_dir: &Path) -> Result<CaManifest> {
        let contents = tokio::fs::read_to_string(Self::manifest_path(certs_dir)).await?;
        Ok(toml::from_str(&contents)?)
    }
}

#[async_trait]
impl CertificateAuthority for ManifestAuthority {
    async fn initialize(&self, certs_dir: &Path) -> Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(certs_dir).await?;

        let manifest = CaManifest {
            serial: Uuid::new_v4().simple().to_string(),
            common_name: self.common_name.clone(),
            issued_at: Utc::now(),
        };
        tokio::fs::write(Self::manifest_path(certs_dir), toml::to_string(&manifest)?).await?;

        info!(
            "Initialized certificate authority '{}' (serial {})",
            manifest.common_name, manifest.serial
        );
        Ok(())
    }

    async fn load(&self, certs_dir: &Path) -> Result<()> {
        let manifest = Self::read_manifest(certs_dir).await?;
        if manifest.common_name != self.common_name {
            return Err(ClusterError::certificate(format!(
                "CA common name '{}' does not match expected '{}'",
                manifest.common_name, self.common_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAuthority {
        initialized: AtomicUsize,
        fail_load: bool,
        fail_init: bool,
    }

    #[async_trait]
    impl CertificateAuthority for CountingAuthority {
        async fn initialize(&self, certs_dir: &Path) -> Result<()> {
            if self.fail_init {
                return Err(ClusterError::certificate("cannot write key"));
            }
            self.initialized.fetch_add(1, Ordering::SeqCst);
            tokio::fs::create_dir_all(certs_dir).await?;
            Ok(())
        }

        async fn load(&self, _certs_dir: &Path) -> Result<()> {
            if self.fail_load {
                return Err(ClusterError::certificate("corrupt CA"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_directory_is_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs");
        let ca = CountingAuthority::default();

        let action = ensure_certificates(&certs, &ca).await.unwrap();
        assert_eq!(action, CertificateAction::Initialized);
        assert_eq!(ca.initialized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_material_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CountingAuthority::default();

        let action = ensure_certificates(dir.path(), &ca).await.unwrap();
        assert_eq!(action, CertificateAction::Loaded);
        assert_eq!(ca.initialized.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broken_material_is_removed_and_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs");
        std::fs::create_dir_all(&certs).unwrap();
        std::fs::write(certs.join("stale.crt"), "stale").unwrap();

        let ca = CountingAuthority {
            fail_load: true,
            ..Default::default()
        };

        let action = ensure_certificates(&certs, &ca).await.unwrap();
        assert_eq!(action, CertificateAction::Reinitialized);
        assert_eq!(ca.initialized.load(Ordering::SeqCst), 1);
        assert!(!certs.join("stale.crt").exists());
    }

    #[tokio::test]
    async fn test_initialize_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CountingAuthority {
            fail_init: true,
            ..Default::default()
        };

        let err = ensure_certificates(&dir.path().join("certs"), &ca)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Certificate { .. }));
    }

    #[tokio::test]
    async fn test_manifest_authority_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs");
        let ca = ManifestAuthority::new("clusterd-ca");

        assert_eq!(
            ensure_certificates(&certs, &ca).await.unwrap(),
            CertificateAction::Initialized
        );
        let first = ManifestAuthority::read_manifest(&certs).await.unwrap();
        assert_eq!(first.common_name, "clusterd-ca");

        assert_eq!(
            ensure_certificates(&certs, &ca).await.unwrap(),
            CertificateAction::Loaded
        );

        let other = ManifestAuthority::new("another-ca");
        assert_eq!(
            ensure_certificates(&certs, &other).await.unwrap(),
            CertificateAction::Reinitialized
        );
        let second = ManifestAuthority::read_manifest(&certs).await.unwrap();
        assert_eq!(second.common_name, "another-ca");
        assert_ne!(first.serial, second.serial);
    }
}
