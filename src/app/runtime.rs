use super::{RunOrchestrator, RunState};
use crate::error::{ClusterError, Result};
use crate::latch::Latch;
use crate::signals::{Interrupt, InterruptSource};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{error, info, warn};

impl RunOrchestrator {
    /// Run every registered service until an interrupt stops them.
    ///
    /// The first interrupt starts a graceful shutdown, whether or not the
    /// services became ready. During shutdown a second interrupt or the grace
    /// period expiring ends the wait immediately. A service that fails before
    /// readiness makes this return that startup failure, as does any error that
    /// keeps the manager from running at all. Failures of services that had
    /// become ready are only logged.
    pub async fn run<S>(&mut self, signals: &mut S) -> Result<RunState>
    where
        S: InterruptSource + ?Sized,
    {
        info!("Starting cluster services");

        let ready = Latch::new();
        let stopped = Latch::new();
        let mut run_task = {
            let manager = self.manager.clone();
            let token = self.cancellation_token.clone();
            let (ready, stopped) = (ready.clone(), stopped.clone());
            tokio::spawn(async move { manager.run(token, ready, stopped).await })
        };
        info!("Started {}", self.manager.name());

        let mut run_result: Option<Result<()>> = None;
        let mut deadline: Option<Instant> = None;
        self.state = RunState::WaitingForReady;

        while !self.state.is_terminal() {
            self.state = match self.state {
                RunState::WaitingForReady => tokio::select! {
                    _ = ready.wait() => {
                        info!("Cluster is ready");
                        self.notify_ready();
                        RunState::Ready
                    }
                    interrupt = next_interrupt(signals) => {
                        info!("{} received before services became ready", interrupt);
                        RunState::Stopping
                    }
                    joined = &mut run_task, if run_result.is_none() => {
                        let result = flatten(joined);
                        if let Err(e) = &result {
                            error!("Stopped {}: {}", self.manager.name(), e);
                        }
                        run_result = Some(result);
                        if stopped.is_set() {
                            RunState::Stopping
                        } else {
                            // The manager never supervised anything, so stop-completion cannot follow.
                            self.cancellation_token.cancel();
                            RunState::Stopped
                        }
                    }
                },
                RunState::Ready => {
                    let interrupt = next_interrupt(signals).await;
                    info!("{} received", interrupt);
                    RunState::Stopping
                }
                RunState::Stopping => {
                    let deadline = *deadline.get_or_insert_with(|| self.begin_stopping());
                    self.await_stop(signals, &stopped, deadline).await
                }
                terminal => terminal,
            };
        }

        if run_result.is_none() && self.state == RunState::Stopped {
            // Stop-completion is fired right before the manager returns.
            run_result = Some(flatten(run_task.await));
        }

        self.finish(run_result)
    }

    fn notify_ready(&self) {
        match self.notifier.notify_ready() {
            Ok(true) => info!("Notified supervisor that the cluster is ready"),
            Ok(false) => {}
            Err(e) => warn!("Failed to notify supervisor of readiness: {}", e),
        }
    }

    fn finish(&self, run_result: Option<Result<()>>) -> Result<RunState> {
        match run_result {
            Some(Ok(())) => info!("{} completed", self.manager.name()),
            Some(Err(e @ ClusterError::ServiceFailures { .. })) => {
                warn!("{} finished with errors: {}", self.manager.name(), e)
            }
            Some(Err(e)) => {
                error!("Cluster failed to start: {}", e);
                return Err(e);
            }
            None => match self.manager.status_json() {
                Ok(status) => warn!("Abandoning services still running: {}", status),
                Err(e) => warn!("Abandoning services still running ({})", e),
            },
        }

        info!("Cluster stopped ({})", self.state);
        Ok(self.state)
    }
}

/// Wait for the next interrupt; a closed source never interrupts again
pub(super) async fn next_interrupt<S>(signals: &mut S) -> Interrupt
where
    S: InterruptSource + ?Sized,
{
    match signals.recv().await {
        Some(interrupt) => interrupt,
        None => std::future::pending().await,
    }
}

fn flatten(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(|e| ClusterError::system(format!("service manager task failed: {}", e)))?
}
