use super::probe::{wait_until_ready, ProbeOutcome, RetryConfig};
use crate::config::ServiceConfig;
use crate::error::{ClusterError, Result};
use crate::service::{ReadySignal, Service};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supervises one external command as a managed service
pub struct ProcessService {
    config: ServiceConfig,
    retry: RetryConfig,
}

impl ProcessService {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_retry(config, RetryConfig::default())
    }

    pub fn with_retry(config: ServiceConfig, retry: RetryConfig) -> Self {
        Self { config, retry }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn spawn(&self) -> Result<Child> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(self.config.env_pairs())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        command.spawn().map_err(|e| {
            ClusterError::service(
                self.config.name.as_str(),
                format!("failed to spawn '{}': {}", self.config.command, e),
            )
        })
    }

    /// Ask the process to exit, escalating to SIGKILL after the stop timeout
    async fn terminate(&self, child: &mut Child) -> Result<()> {
        let name = self.config.name.as_str();
        let stop_timeout = self.config.stop_timeout();

        if let Some(pid) = child.id() {
            debug!("Sending SIGTERM to '{}' (pid {})", name, pid);
            send_sigterm(child, pid);
        }

        match timeout(stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process for '{}' exited with {}", name, status);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(
                    "Process for '{}' did not exit within {:?}, killing it",
                    name, stop_timeout
                );
                child.kill().await?;
                Err(ClusterError::service(
                    name,
                    format!("killed after {:?} stop timeout", stop_timeout),
                ))
            }
        }
    }
}

#[async_trait]
impl Service for ProcessService {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(&self, ctx: CancellationToken, ready: ReadySignal) -> Result<()> {
        let name = self.config.name.as_str();
        let mut child = self.spawn()?;
        info!(
            "Spawned '{}' for service '{}' (pid {:?})",
            self.config.command,
            name,
            child.id()
        );

        let outcome = tokio::select! {
            outcome = wait_until_ready(&self.config.readiness, &self.retry, &ctx) => outcome,
            status = child.wait() => {
                let status = status?;
                return Err(ClusterError::service(
                    name,
                    format!("process exited during startup with {}", status),
                ));
            }
        };

        if outcome == ProbeOutcome::Cancelled {
            debug!("Service '{}' cancelled before becoming ready", name);
            return self.terminate(&mut child).await;
        }
        ready.signal();

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    warn!("Process for '{}' exited on its own", name);
                    Ok(())
                } else {
                    error!("Process for '{}' exited with {}", name, status);
                    Err(ClusterError::service(name, format!("process exited with {}", status)))
                }
            }
            _ = ctx.cancelled() => self.terminate(&mut child).await,
        }
    }
}

#[cfg(unix)]
fn send_sigterm(_child: &mut Child, pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions; pid came from our own child.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(
            "Failed to send SIGTERM to pid {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child, _pid: u32) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to stop child process: {}", e);
    }
}
