use super::state::StateTable;
use super::ServiceManager;
use crate::error::{ClusterError, FailurePhase, Result, ServiceFailure};
use crate::latch::Latch;
use crate::service::{ReadySignal, ServiceRef, ServiceState};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How a single service's run call ended
struct ServiceExit {
    name: String,
    was_ready: bool,
    result: Result<()>,
}

/// Bookkeeping for one call to [`ServiceManager::run`]
#[derive(Default)]
struct RunOutcome {
    startup_failure: Option<ClusterError>,
    failures: Vec<ServiceFailure>,
}

impl ServiceManager {
    /// Start every registered service and supervise them until `ctx` is cancelled.
    ///
    /// `ready` is fired once every service has signalled readiness. It is never
    /// fired if a service returns before becoming ready; in that case the
    /// remaining services are cancelled and the startup failure is returned.
    /// `stopped` is fired once every service's run call has returned, whatever
    /// the outcome.
    pub async fn run(&self, ctx: CancellationToken, ready: Latch, stopped: Latch) -> Result<()> {
        let services = {
            let services = self.services.lock();
            if self.started.swap(true, Ordering::SeqCst) {
                return Err(ClusterError::registration(
                    self.name(),
                    "service manager has already been started",
                ));
            }
            services.clone()
        };

        let span = info_span!("service_manager", run_id = %Uuid::new_v4());
        self.supervise(services, ctx, ready, stopped)
            .instrument(span)
            .await
    }

    async fn supervise(
        &self,
        services: Vec<ServiceRef>,
        ctx: CancellationToken,
        ready: Latch,
        stopped: Latch,
    ) -> Result<()> {
        let total = services.len();
        let token = ctx.child_token();
        let pending = Arc::new(AtomicUsize::new(total));
        let all_ready = Latch::new();
        if total == 0 {
            all_ready.fire();
        }

        info!("Starting {} services", total);

        let mut tasks = JoinSet::new();
        for service in services {
            let name = service.name().to_string();
            let became_ready = Arc::new(AtomicBool::new(false));
            let signal = readiness_signal(
                name.clone(),
                Arc::clone(&became_ready),
                Arc::clone(&pending),
                all_ready.clone(),
                Arc::clone(&self.states),
            );

            self.states.set(&name, ServiceState::Starting);
            debug!("Starting service '{}'", name);

            let child = token.clone();
            let span = info_span!("service", name = %name);
            tasks.spawn(
                async move {
                    let handle = tokio::spawn(
                        async move { service.run(child, signal).await }.in_current_span(),
                    );
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => {
                            Err(ClusterError::service(name.as_str(), "service task panicked"))
                        }
                        Err(e) => Err(ClusterError::service(name.as_str(), e.to_string())),
                    };
                    ServiceExit {
                        name,
                        was_ready: became_ready.load(Ordering::SeqCst),
                        result,
                    }
                }
                .instrument(span),
            );
        }

        let mut outcome = RunOutcome::default();
        let mut ready_emitted = false;
        let mut cancel_observed = false;

        while !(tasks.is_empty() && token.is_cancelled()) {
            tokio::select! {
                biased;

                _ = all_ready.wait(), if !ready_emitted && outcome.startup_failure.is_none() => {
                    ready_emitted = true;
                    if ready.fire() {
                        info!("All {} services are ready", total);
                    }
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok(exit) => self.record_exit(exit, &token, &mut outcome),
                    Err(e) => error!("Service supervision task failed: {}", e),
                },
                _ = token.cancelled(), if !cancel_observed => {
                    cancel_observed = true;
                    info!("Cancellation received, waiting for {} services to stop", tasks.len());
                    self.states.mark_stopping();
                }
            }
        }

        stopped.fire();
        info!("All services stopped");

        if let Some(err) = outcome.startup_failure {
            for failure in &outcome.failures {
                warn!("Additional service failure: {}", failure);
            }
            return Err(err);
        }
        if !outcome.failures.is_empty() {
            return Err(ClusterError::ServiceFailures {
                failures: outcome.failures,
            });
        }
        Ok(())
    }

    fn record_exit(&self, exit: ServiceExit, token: &CancellationToken, outcome: &mut RunOutcome) {
        let ServiceExit {
            name,
            was_ready,
            result,
        } = exit;
        let cancelled = token.is_cancelled();

        let err = match result {
            Ok(()) if was_ready || cancelled => {
                self.states.set(&name, ServiceState::Stopped);
                if cancelled {
                    info!("Service '{}' stopped", name);
                } else {
                    warn!("Service '{}' exited before cancellation", name);
                }
                return;
            }
            Ok(()) => ClusterError::service(name.as_str(), "exited before becoming ready"),
            Err(e) => e,
        };

        let message = err.to_string();
        self.states.fail(&name, message.clone());

        let phase = match (was_ready, cancelled) {
            (false, false) => FailurePhase::Startup,
            (true, false) => FailurePhase::Runtime,
            (_, true) => FailurePhase::Shutdown,
        };

        match phase {
            FailurePhase::Startup => {
                error!("Service '{}' failed to start: {}", name, message);
                if outcome.startup_failure.is_none() {
                    outcome.startup_failure = Some(ClusterError::Startup {
                        service: name,
                        message,
                    });
                    warn!("Startup failed, cancelling the remaining services");
                    token.cancel();
                    return;
                }
            }
            FailurePhase::Runtime => error!("Service '{}' failed: {}", name, message),
            FailurePhase::Shutdown => warn!("Service '{}' failed while stopping: {}", name, message),
        }

        outcome.failures.push(ServiceFailure {
            service: name,
            phase,
            message,
        });
    }
}

/// Build the one-shot readiness handle for a service.
///
/// The pending counter is decremented once per service; the call that brings it
/// to zero sets the aggregate latch.
fn readiness_signal(
    name: String,
    became_ready: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    all_ready: Latch,
    states: Arc<StateTable>,
) -> ReadySignal {
    ReadySignal::new(move || {
        if became_ready.swap(true, Ordering::SeqCst) {
            return;
        }
        states.set(&name, ServiceState::Running);
        info!("Service '{}' is ready", name);
        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            all_ready.fire();
        }
    })
}
