use crate::config::ReadinessProbe;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Retry schedule for readiness probes
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            exponential_backoff: true,
        }
    }
}

impl RetryConfig {
    /// Calculate delay after `attempt` failed probes, with exponential backoff
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay;
        }

        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of waiting for a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Cancelled,
}

impl ReadinessProbe {
    /// Run the probe once
    pub async fn check(&self) -> bool {
        match self {
            ReadinessProbe::Immediate => true,
            ReadinessProbe::Delay { .. } => true,
            ReadinessProbe::Tcp { address } => {
                matches!(
                    timeout(CONNECT_TIMEOUT, TcpStream::connect(address.as_str())).await,
                    Ok(Ok(_))
                )
            }
            ReadinessProbe::File { path } => tokio::fs::metadata(path).await.is_ok(),
        }
    }
}

/// Poll `probe` until it passes or `ctx` is cancelled
pub async fn wait_until_ready(
    probe: &ReadinessProbe,
    retry: &RetryConfig,
    ctx: &CancellationToken,
) -> ProbeOutcome {
    if let ReadinessProbe::Delay { millis } = probe {
        return tokio::select! {
            _ = sleep(Duration::from_millis(*millis)) => ProbeOutcome::Ready,
            _ = ctx.cancelled() => ProbeOutcome::Cancelled,
        };
    }

    let mut attempt = 0;
    loop {
        if ctx.is_cancelled() {
            return ProbeOutcome::Cancelled;
        }
        if probe.check().await {
            debug!("Readiness probe passed after {} retries", attempt);
            return ProbeOutcome::Ready;
        }

        let delay = retry.delay_for(attempt);
        trace!("Readiness probe not passing yet, retrying in {:?}", delay);
        attempt = attempt.saturating_add(1);

        tokio::select! {
            _ = sleep(delay) => {}
            _ = ctx.cancelled() => return ProbeOutcome::Cancelled,
        }
    }
}
