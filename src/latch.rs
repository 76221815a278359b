//! Fire-once events shared between the service manager and its caller.
//!
//! A [`Latch`] starts unset and can be set exactly once. Waiters that arrive
//! after the latch was set still observe it, so the aggregate ready and stopped
//! events never depend on who started listening first.

use std::sync::Arc;
use tokio::sync::watch;

/// Latched one-shot event. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct Latch {
    tx: Arc<watch::Sender<bool>>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the latch. Returns `true` only for the call that actually set it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is set; returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fire_reports_first_setter_only() {
        let latch = Latch::new();
        assert!(!latch.is_set());
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.clone().is_set());
    }

    #[tokio::test]
    async fn test_late_waiter_observes_fired_latch() {
        let latch = Latch::new();
        latch.fire();

        tokio::time::timeout(Duration::from_millis(100), latch.wait())
            .await
            .expect("late waiter should observe the latch");
    }

    #[tokio::test]
    async fn test_waiter_is_released_by_fire() {
        let latch = Latch::new();
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        latch.fire();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
    }
}
