//! Process-wide shutdown signal
//!
//! A single `watch` flag flipped once. Every long-lived task holds a
//! [`Shutdown`] and selects on [`Shutdown::wait`] alongside its real work.

use tokio::sync::watch;

/// Fires the shutdown signal. Dropping the trigger also counts as shutdown.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Observes the shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/observer pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// New observer for this trigger
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// Whether shutdown has already been signalled
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown is signalled (or the trigger is gone)
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let (trigger, shutdown) = channel();
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let mut s = shutdown.clone();
            waiters.push(tokio::spawn(async move { s.wait().await }));
        }
        assert!(!shutdown.is_triggered());

        trigger.trigger();
        for w in waiters {
            tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .expect("waiter unblocked")
                .unwrap();
        }
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);
        assert!(shutdown.is_triggered());
        shutdown.wait().await;
    }
}
