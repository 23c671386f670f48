//! Connection actor
//!
//! The only code that mutates board slots. Jobs, connect results, and
//! close notices all arrive as [`Event`]s and are handled one at a time;
//! dialing and handshaking happen in spawned tasks so a hung board never
//! stalls the loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::link::{BoardLink, Connector};
use super::slot::{BoardSlot, Lease};
use super::{BoardSettings, BoardTarget};
use crate::shutdown::Shutdown;
use crate::types::{NexusError, Result};

pub(crate) type Operation<L> = Box<dyn FnOnce(Lease<L>) + Send>;

/// One unit of work against one board
pub(crate) struct Job<L> {
    pub(crate) board: usize,
    pub(crate) operation: Operation<L>,
}

pub(crate) enum Event<L> {
    /// The board's connection was lost, or it is time for the next attempt
    Disconnected(usize),
    /// A connect attempt failed; the retry follows after the backoff
    ConnectFailed(usize),
    /// A connect attempt produced a handshaken link
    Connected(usize, Arc<L>),
    Job(Job<L>),
    Shutdown,
}

pub(crate) struct ConnectionActor<C: Connector> {
    connector: Arc<C>,
    settings: BoardSettings,
    slots: Vec<BoardSlot<C::Link>>,
    next_epoch: u64,
    jobs: mpsc::Receiver<Job<C::Link>>,
    events: mpsc::Receiver<Event<C::Link>>,
    events_tx: mpsc::Sender<Event<C::Link>>,
    shutdown: Shutdown,
}

impl<C: Connector> ConnectionActor<C> {
    pub(crate) fn new(
        connector: Arc<C>,
        targets: &[BoardTarget],
        settings: BoardSettings,
        jobs: mpsc::Receiver<Job<C::Link>>,
        shutdown: Shutdown,
    ) -> Self {
        let slots: Vec<_> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| BoardSlot::new(i, t.name.clone(), t.address.clone(), i as u64))
            .collect();
        // Per board, at most one connect task or one close watcher is ever
        // waiting to send.
        let (events_tx, events) = mpsc::channel(slots.len().max(1));

        Self {
            connector,
            settings,
            next_epoch: slots.len() as u64,
            slots,
            jobs,
            events,
            events_tx,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Connection actor starting with {} board(s)", self.slots.len());
        for board in 0..self.slots.len() {
            self.spawn_connect(board);
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.wait() => Event::Shutdown,
                Some(event) = self.events.recv() => event,
                Some(job) = self.jobs.recv() => Event::Job(job),
            };
            if !self.handle(event) {
                break;
            }
        }

        self.teardown();
    }

    /// Returns false once the loop should stop
    fn handle(&mut self, event: Event<C::Link>) -> bool {
        match event {
            Event::Job(job) => self.run_job(job),
            Event::Disconnected(board) => self.on_disconnected(board),
            Event::ConnectFailed(board) => {
                if let Some(slot) = self.slots.get(board) {
                    slot.attempt_failed();
                }
            }
            Event::Connected(board, link) => self.on_connected(board, link),
            Event::Shutdown => return false,
        }
        true
    }

    fn run_job(&self, job: Job<C::Link>) {
        match self.slots.get(job.board) {
            Some(slot) => {
                debug!(
                    "Running job on board {} (connected: {})",
                    job.board,
                    slot.is_connected()
                );
                (job.operation)(slot.lease());
            }
            // Dropping the operation closes the submitter's reply channel
            None => warn!("Dropping job for unknown board {}", job.board),
        }
    }

    fn on_disconnected(&mut self, board: usize) {
        let Some(slot) = self.slots.get_mut(board) else {
            return;
        };

        if let Some(link) = slot.discard(self.next_epoch) {
            self.next_epoch += 1;
            link.close();
            info!(
                "Board {} ({}) disconnected, now epoch {}",
                slot.index,
                slot.name,
                slot.epoch()
            );
        }

        self.spawn_connect(board);
    }

    fn on_connected(&mut self, board: usize, link: Arc<C::Link>) {
        let Some(slot) = self.slots.get_mut(board) else {
            link.close();
            return;
        };

        if !slot.install(Arc::clone(&link)) {
            warn!("Board {} already connected, closing duplicate link", board);
            link.close();
            return;
        }
        info!(
            "Board {} ({}) connected at {} (epoch {})",
            slot.index,
            slot.name,
            slot.address,
            slot.epoch()
        );

        let closed = link.closed();
        let events = self.events_tx.clone();
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.wait() => {}
                _ = closed => {
                    tokio::select! {
                        _ = shutdown.wait() => {}
                        _ = events.send(Event::Disconnected(board)) => {}
                    }
                }
            }
        });
    }

    fn spawn_connect(&self, board: usize) {
        let slot = &self.slots[board];
        let task = ConnectTask {
            connector: Arc::clone(&self.connector),
            board,
            address: slot.address.clone(),
            dial_timeout: self.settings.dial_timeout,
            backoff: self.settings.reconnect_backoff,
            events: self.events_tx.clone(),
            shutdown: self.shutdown.clone(),
        };
        tokio::spawn(task.run());
    }

    fn teardown(&mut self) {
        for slot in &mut self.slots {
            if let Some(link) = slot.take_link() {
                link.close();
            }
        }
        info!("Connection actor stopped");
    }
}

/// One dial + handshake attempt, reporting back to the actor
struct ConnectTask<C: Connector> {
    connector: Arc<C>,
    board: usize,
    address: String,
    dial_timeout: Duration,
    backoff: Duration,
    events: mpsc::Sender<Event<C::Link>>,
    shutdown: Shutdown,
}

impl<C: Connector> ConnectTask<C> {
    async fn run(mut self) {
        debug!("Connecting board {} at {}", self.board, self.address);

        let result = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return,
            result = dial_and_handshake(&*self.connector, &self.address, self.dial_timeout) => result,
        };

        match result {
            Ok(link) => {
                let link = Arc::new(link);
                tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => link.close(),
                    sent = self.events.send(Event::Connected(self.board, Arc::clone(&link))) => {
                        if sent.is_err() {
                            link.close();
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Board {} connect to {} failed: {}, retrying in {:?}",
                    self.board, self.address, e, self.backoff
                );
                tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => return,
                    _ = self.events.send(Event::ConnectFailed(self.board)) => {}
                }
                tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => return,
                    _ = tokio::time::sleep(self.backoff) => {}
                }
                tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => {}
                    _ = self.events.send(Event::Disconnected(self.board)) => {}
                }
            }
        }
    }
}

/// Dial then handshake under one shared deadline
async fn dial_and_handshake<C: Connector>(
    connector: &C,
    address: &str,
    timeout: Duration,
) -> Result<C::Link> {
    let deadline = Instant::now() + timeout;

    let link = tokio::time::timeout_at(deadline, connector.dial(address))
        .await
        .map_err(|_| NexusError::Connect(format!("dial {} timed out", address)))??;

    match tokio::time::timeout_at(deadline, connector.handshake(&link)).await {
        Ok(Ok(())) => Ok(link),
        Ok(Err(e)) => {
            link.close();
            Err(e)
        }
        Err(_) => {
            link.close();
            Err(NexusError::Connect(format!("handshake with {} timed out", address)))
        }
    }
}
