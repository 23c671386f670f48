//! Per-board state owned by the connection actor

use std::sync::Arc;

use super::gate::{GateSource, ReadyGate};
use super::link::BoardLink;

/// What a job sees when the actor runs it
pub enum Lease<L> {
    /// Snapshot of the installed handle
    Connected(Arc<L>),
    /// No handle; wait on the gate and resubmit
    NotReady(ReadyGate),
}

pub(crate) struct BoardSlot<L> {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) address: String,
    link: Option<Arc<L>>,
    gate: GateSource,
}

impl<L: BoardLink> BoardSlot<L> {
    pub(crate) fn new(index: usize, name: String, address: String, epoch: u64) -> Self {
        Self {
            index,
            name,
            address,
            link: None,
            gate: GateSource::new(epoch),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.gate.epoch()
    }

    pub(crate) fn lease(&self) -> Lease<L> {
        match &self.link {
            Some(link) => Lease::Connected(Arc::clone(link)),
            None => Lease::NotReady(self.gate.gate()),
        }
    }

    /// Install a new handle and fire the epoch's gate.
    ///
    /// Returns false, leaving the slot untouched, if a handle is already
    /// installed.
    pub(crate) fn install(&mut self, link: Arc<L>) -> bool {
        if self.link.is_some() {
            return false;
        }
        self.link = Some(link);
        self.gate.fire();
        true
    }

    /// Drop the current handle, if any, and open epoch `next_epoch`.
    pub(crate) fn discard(&mut self, next_epoch: u64) -> Option<Arc<L>> {
        let link = self.link.take()?;
        self.gate = GateSource::new(next_epoch);
        Some(link)
    }

    /// Tell waiters of the current epoch that an attempt failed
    pub(crate) fn attempt_failed(&self) {
        self.gate.attempt_failed();
    }

    pub(crate) fn take_link(&mut self) -> Option<Arc<L>> {
        self.link.take()
    }
}
