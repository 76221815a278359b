use super::runtime::next_interrupt;
use super::{RunOrchestrator, RunState};
use crate::latch::Latch;
use crate::signals::InterruptSource;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

impl RunOrchestrator {
    /// Cancel the shared token and arm the grace timer. Returns the deadline.
    pub(super) fn begin_stopping(&self) -> Instant {
        info!(
            "Stopping services (grace period {:?})",
            self.grace_period
        );
        self.cancellation_token.cancel();
        Instant::now() + self.grace_period
    }

    /// Wait for stop-completion, a second interrupt or the grace deadline
    pub(super) async fn await_stop<S>(
        &self,
        signals: &mut S,
        stopped: &Latch,
        deadline: Instant,
    ) -> RunState
    where
        S: InterruptSource + ?Sized,
    {
        tokio::select! {
            // A second interrupt always wins, even if services are about to finish.
            biased;

            interrupt = next_interrupt(signals) => {
                warn!("Another interrupt ({}) received. Force terminating services", interrupt);
                RunState::ForceStopped
            }
            _ = stopped.wait() => {
                info!("All services stopped");
                RunState::Stopped
            }
            _ = sleep_until(deadline) => {
                warn!(
                    "Timed out after {:?} waiting for services to stop",
                    self.grace_period
                );
                RunState::TimedOut
            }
        }
    }
}
