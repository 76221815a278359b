//! The contract every supervised unit implements.
//!
//! A [`Service`] is started once by the service manager. It performs whatever
//! blocking initialization it needs, calls [`ReadySignal::signal`], keeps running
//! until its cancellation token fires, cleans up and returns. Returning before
//! signalling readiness is a startup failure; returning an error afterwards is a
//! runtime failure.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A named, independently failing unit of work supervised by the service manager.
#[async_trait]
pub trait Service: Send + Sync {
    /// Stable identifier, unique within one manager.
    fn name(&self) -> &str;

    /// Run until `ctx` is cancelled, reporting readiness through `ready`.
    async fn run(&self, ctx: CancellationToken, ready: ReadySignal) -> Result<()>;
}

/// Shared handle to a registered service.
pub type ServiceRef = Arc<dyn Service>;

/// Service lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Unstarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ServiceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// One-shot readiness handle passed to [`Service::run`].
///
/// Consumed by [`ReadySignal::signal`], so a service cannot report readiness twice.
/// Dropping it without signalling means the service never became ready.
pub struct ReadySignal {
    on_ready: Box<dyn FnOnce() + Send>,
}

impl ReadySignal {
    pub fn new<F>(on_ready: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            on_ready: Box::new(on_ready),
        }
    }

    /// Report that the service finished its startup and is serving.
    pub fn signal(self) {
        (self.on_ready)();
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal").finish_non_exhaustive()
    }
}

/// Closure-backed service.
///
/// The closure builds a fresh future for the single run the manager performs.
pub struct FnService<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> FnService<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Create the service as a shared [`ServiceRef`]-compatible handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Service for FnService<F>
where
    F: Fn(CancellationToken, ReadySignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken, ready: ReadySignal) -> Result<()> {
        (self.f)(ctx, ready).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_service_runs_closure() {
        let service = FnService::arc("echo", |ctx: CancellationToken, ready: ReadySignal| async move {
            ready.signal();
            ctx.cancelled().await;
            Ok(())
        });
        assert_eq!(service.name(), "echo");

        let signalled = Arc::new(AtomicUsize::new(0));
        let ready = {
            let signalled = Arc::clone(&signalled);
            ReadySignal::new(move || {
                signalled.fetch_add(1, Ordering::SeqCst);
            })
        };

        let ctx = CancellationToken::new();
        ctx.cancel();
        service.run(ctx, ready).await.unwrap();
        assert_eq!(signalled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ServiceState::Stopped.is_terminal());
        assert!(ServiceState::Failed.is_terminal());
        assert!(!ServiceState::Running.is_terminal());
        assert!(!ServiceState::Unstarted.is_terminal());
    }
}
