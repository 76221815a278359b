//! Interrupt sources feeding the run orchestrator.
//!
//! On unix the process listens for SIGINT and SIGTERM; other platforms only get
//! Ctrl-C. Tests drive the orchestrator through an mpsc channel instead.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// An external request to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Interrupt => f.write_str("SIGINT"),
            Interrupt::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// A stream of interrupts. Returns `None` once no further interrupts can arrive.
#[async_trait]
pub trait InterruptSource: Send {
    async fn recv(&mut self) -> Option<Interrupt>;
}

/// Interrupts delivered by the operating system
pub struct OsSignals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
}

impl OsSignals {
    /// Register the signal handlers. Call this before starting any service so
    /// that no early interrupt is lost.
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }
}

#[async_trait]
impl InterruptSource for OsSignals {
    async fn recv(&mut self) -> Option<Interrupt> {
        #[cfg(unix)]
        let interrupt = tokio::select! {
            received = self.sigint.recv() => received.map(|_| Interrupt::Interrupt),
            received = self.sigterm.recv() => received.map(|_| Interrupt::Terminate),
        };
        #[cfg(not(unix))]
        let interrupt = tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|_| Interrupt::Interrupt);

        if let Some(interrupt) = interrupt {
            debug!("Received {}", interrupt);
        }
        interrupt
    }
}

#[async_trait]
impl InterruptSource for mpsc::UnboundedReceiver<Interrupt> {
    async fn recv(&mut self) -> Option<Interrupt> {
        mpsc::UnboundedReceiver::recv(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Interrupt::Terminate).unwrap();
        tx.send(Interrupt::Interrupt).unwrap();
        drop(tx);

        let source: &mut dyn InterruptSource = &mut rx;
        assert_eq!(source.recv().await, Some(Interrupt::Terminate));
        assert_eq!(source.recv().await, Some(Interrupt::Interrupt));
        assert_eq!(source.recv().await, None);
    }

    #[test]
    fn test_interrupt_display() {
        assert_eq!(Interrupt::Interrupt.to_string(), "SIGINT");
        assert_eq!(Interrupt::Terminate.to_string(), "SIGTERM");
    }
}
