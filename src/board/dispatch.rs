//! Caller-facing dispatch with bounded retry
//!
//! A call submits a job. If the board is down the actor hands the operation
//! back together with the board's current [`ReadyGate`]; the caller waits on
//! the gate and resubmits. Three submissions is the ceiling, so a flapping or
//! dead board turns into [`NexusError::Unreachable`] instead of an endless
//! wait. Reconnecting itself never gives up; that lives in the actor.
//!
//! A failed connect attempt only triggers a resubmit once a full reconnect
//! backoff has passed since the caller's previous submission. A fired gate
//! triggers one immediately.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use super::actor::{ConnectionActor, Job};
use super::gate::{GateSignal, ReadyGate};
use super::link::{BoardLink, Connector};
use super::slot::Lease;
use super::{BoardSettings, BoardTarget};
use crate::proxy::{PeerClosed, ProxyStream};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::types::{NexusError, Result};

/// Submissions per call before giving up
pub const MAX_ATTEMPTS: usize = 3;

/// Outcome of one submission
enum Attempt<F, R> {
    Done(R),
    /// Board was down: the operation comes back unused
    NotReady(F, ReadyGate),
}

/// Handle to the set of boards managed by one connection actor
pub struct Boards<L> {
    jobs: mpsc::Sender<Job<L>>,
    count: usize,
    /// Minimum spacing between submissions after a failed connect attempt
    backoff: Duration,
    trigger: Arc<ShutdownTrigger>,
    shutdown: Shutdown,
}

impl<L> Clone for Boards<L> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            count: self.count,
            backoff: self.backoff,
            trigger: Arc::clone(&self.trigger),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<L: BoardLink> Boards<L> {
    /// Spawn the connection actor and start connecting every board.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<C>(connector: C, targets: Vec<BoardTarget>, settings: BoardSettings) -> Self
    where
        C: Connector<Link = L>,
    {
        let (trigger, shutdown) = shutdown::channel();
        let (jobs_tx, jobs_rx) = mpsc::channel(settings.job_queue_size.max(1));
        let count = targets.len();
        let backoff = settings.reconnect_backoff;

        let actor = ConnectionActor::new(
            Arc::new(connector),
            &targets,
            settings,
            jobs_rx,
            shutdown.clone(),
        );
        tokio::spawn(actor.run());

        Self {
            jobs: jobs_tx,
            count,
            backoff,
            trigger: Arc::new(trigger),
            shutdown,
        }
    }

    /// Number of configured boards
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Stop the actor, abort connect attempts, and fail every waiting call
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    /// Observer for this board set's shutdown
    pub fn closed(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run `op` against board `board`'s live connection.
    ///
    /// The operation runs exactly once, inside the actor, with a handle that
    /// cannot change underneath it.
    pub async fn dispatch<F, R>(&self, board: usize, op: F) -> Result<R>
    where
        F: FnOnce(&L) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.with_retry(board, op, None).await
    }

    /// Attach `pipe` to board `board` once it is connected.
    ///
    /// `before_attach` sees the live connection right before the pipe is
    /// attached and is never called if the attach does not happen. If
    /// `peer_closed` resolves while waiting for the board, the call fails
    /// with [`NexusError::PeerClosed`].
    pub async fn add_proxy_pipe<B>(
        &self,
        board: usize,
        pipe: ProxyStream,
        peer_closed: Option<PeerClosed>,
        before_attach: B,
    ) -> Result<()>
    where
        B: FnOnce(&L) + Send + 'static,
    {
        let attach = move |link: &L| {
            before_attach(link);
            link.attach_proxy(pipe);
        };
        self.with_retry(board, attach, peer_closed).await
    }

    async fn with_retry<F, R>(
        &self,
        board: usize,
        op: F,
        mut peer_closed: Option<PeerClosed>,
    ) -> Result<R>
    where
        F: FnOnce(&L) -> R + Send + 'static,
        R: Send + 'static,
    {
        if board >= self.count {
            return Err(NexusError::InvalidBoard {
                board,
                count: self.count,
            });
        }

        let mut op = op;
        for attempt in 1..=MAX_ATTEMPTS {
            let submitted_at = Instant::now();
            let gate = match self.submit(board, op).await? {
                Attempt::Done(out) => return Ok(out),
                Attempt::NotReady(returned, gate) => {
                    op = returned;
                    gate
                }
            };

            debug!(
                "Board {} not ready (attempt {}/{}, epoch {})",
                board,
                attempt,
                MAX_ATTEMPTS,
                gate.epoch()
            );
            if attempt == MAX_ATTEMPTS {
                break;
            }

            self.wait_to_resubmit(board, gate, submitted_at, &mut peer_closed)
                .await?;
        }

        Err(NexusError::Unreachable {
            board,
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Block until the next submission is worthwhile: the gate fired, or a
    /// connect attempt failed and a backoff has passed since `submitted_at`.
    async fn wait_to_resubmit(
        &self,
        board: usize,
        mut gate: ReadyGate,
        submitted_at: Instant,
        peer_closed: &mut Option<PeerClosed>,
    ) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        let spacing = tokio::time::sleep_until(submitted_at + self.backoff);
        tokio::pin!(spacing);
        let mut failed = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => return Err(NexusError::Closed),
                _ = peer_gone(peer_closed) => return Err(NexusError::PeerClosed),
                signal = gate.wait() => {
                    debug!("Board {} gate: {:?}", board, signal);
                    match signal {
                        GateSignal::AttemptFailed => failed = true,
                        GateSignal::Ready | GateSignal::Retired => return Ok(()),
                    }
                }
                _ = &mut spacing, if failed => return Ok(()),
            }
        }
    }

    /// Queue one job and wait for the actor to run it
    async fn submit<F, R>(&self, board: usize, op: F) -> Result<Attempt<F, R>>
    where
        F: FnOnce(&L) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            board,
            operation: Box::new(move |lease: Lease<L>| {
                let attempt = match lease {
                    Lease::Connected(link) => Attempt::Done(op(&*link)),
                    Lease::NotReady(gate) => Attempt::NotReady(op, gate),
                };
                let _ = reply_tx.send(attempt);
            }),
        };

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.wait() => return Err(NexusError::Closed),
            sent = self.jobs.send(job) => sent.map_err(|_| NexusError::Closed)?,
        }

        reply_rx.await.map_err(|_| NexusError::Closed)
    }
}

async fn peer_gone(peer_closed: &mut Option<PeerClosed>) {
    match peer_closed {
        Some(closed) => closed.await,
        None => std::future::pending().await,
    }
}
