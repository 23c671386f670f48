//! Readiness gates
//!
//! A gate belongs to one connection epoch of one board. It starts not-ready
//! and fires ready exactly once, after the actor has installed the epoch's
//! handle. The actor never resets a gate; a disconnect retires it and
//! allocates a new one for the next epoch.
//!
//! Besides firing, the actor bumps a failed-attempt counter whenever a
//! connect attempt for the epoch fails. Waiters wake on either change and
//! resubmit, which keeps the caller-side retry ceiling meaningful for boards
//! that never come back.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GateState {
    ready: bool,
    failed_attempts: u32,
}

/// Why a wait on a [`ReadyGate`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// The board is connected for this epoch
    Ready,
    /// A connect attempt failed; the board is still down
    AttemptFailed,
    /// The gate's owner went away without firing it
    Retired,
}

/// Actor-side end of a gate. Only the actor holds these.
#[derive(Debug)]
pub(crate) struct GateSource {
    epoch: u64,
    tx: watch::Sender<GateState>,
}

impl GateSource {
    pub(crate) fn new(epoch: u64) -> Self {
        let (tx, _) = watch::channel(GateState::default());
        Self { epoch, tx }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Hand out a waiter for this epoch
    pub(crate) fn gate(&self) -> ReadyGate {
        let rx = self.tx.subscribe();
        let seen_failures = rx.borrow().failed_attempts;
        ReadyGate {
            epoch: self.epoch,
            seen_failures,
            rx,
        }
    }

    /// Mark the epoch ready. Returns false if it already was.
    pub(crate) fn fire(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.ready {
                false
            } else {
                state.ready = true;
                true
            }
        })
    }

    /// Record a failed connect attempt and wake waiters
    pub(crate) fn attempt_failed(&self) {
        self.tx.send_if_modified(|state| {
            if state.ready {
                return false;
            }
            state.failed_attempts = state.failed_attempts.wrapping_add(1);
            true
        });
    }

    #[cfg(test)]
    pub(crate) fn is_ready(&self) -> bool {
        self.tx.borrow().ready
    }
}

/// Caller-side view of a board's readiness for one epoch
#[derive(Debug, Clone)]
pub struct ReadyGate {
    epoch: u64,
    seen_failures: u32,
    rx: watch::Receiver<GateState>,
}

impl ReadyGate {
    /// Connection epoch this gate belongs to
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().ready
    }

    /// Wait until the gate fires, a connect attempt fails, or the gate is
    /// retired. A fired gate returns [`GateSignal::Ready`] immediately.
    pub async fn wait(&mut self) -> GateSignal {
        let seen = self.seen_failures;
        let state = match self
            .rx
            .wait_for(|state| state.ready || state.failed_attempts != seen)
            .await
        {
            Ok(state) => *state,
            Err(_) => return GateSignal::Retired,
        };

        if state.ready {
            GateSignal::Ready
        } else {
            self.seen_failures = state.failed_attempts;
            GateSignal::AttemptFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fires_at_most_once() {
        let source = GateSource::new(7);
        assert!(!source.is_ready());
        assert!(source.fire());
        assert!(!source.fire());
        assert!(source.is_ready());
        assert_eq!(source.gate().epoch(), 7);
    }

    #[tokio::test]
    async fn test_all_waiters_observe_ready() {
        let source = GateSource::new(1);
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let mut gate = source.gate();
            waiters.push(tokio::spawn(async move { gate.wait().await }));
        }
        tokio::task::yield_now().await;

        source.fire();
        for w in waiters {
            assert_eq!(w.await.unwrap(), GateSignal::Ready);
        }

        // Late subscribers see the fired state immediately
        let mut late = source.gate();
        assert!(late.is_ready());
        assert_eq!(late.wait().await, GateSignal::Ready);
    }

    #[tokio::test]
    async fn test_failed_attempt_wakes_once_per_failure() {
        let source = GateSource::new(2);
        let mut gate = source.gate();

        source.attempt_failed();
        assert_eq!(gate.wait().await, GateSignal::AttemptFailed);

        // Already consumed, so the next wait blocks until something new happens
        let pending = tokio::time::timeout(Duration::from_millis(20), gate.wait()).await;
        assert!(pending.is_err());

        source.attempt_failed();
        assert_eq!(gate.wait().await, GateSignal::AttemptFailed);
        assert!(!gate.is_ready());
    }

    #[tokio::test]
    async fn test_failures_after_fire_are_ignored() {
        let source = GateSource::new(3);
        source.fire();
        source.attempt_failed();
        let mut gate = source.gate();
        assert_eq!(gate.wait().await, GateSignal::Ready);
    }

    #[tokio::test]
    async fn test_dropped_source_retires_gate() {
        let source = GateSource::new(4);
        let mut gate = source.gate();
        drop(source);
        assert_eq!(gate.wait().await, GateSignal::Retired);
    }
}
