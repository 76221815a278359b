use std::fmt;

/// States of the run orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Services are starting; waiting for aggregate readiness or an interrupt
    WaitingForReady,
    /// Every service is ready; waiting for an interrupt
    Ready,
    /// Cancellation was requested; waiting for stop-completion, a second interrupt or the grace timer
    Stopping,
    /// All services reported completion
    Stopped,
    /// A second interrupt arrived during shutdown
    ForceStopped,
    /// The grace period elapsed during shutdown
    TimedOut,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::ForceStopped | Self::TimedOut)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::WaitingForReady => "waiting-for-ready",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ForceStopped => "force-stopped",
            Self::TimedOut => "timed-out",
        };
        f.write_str(label)
    }
}
