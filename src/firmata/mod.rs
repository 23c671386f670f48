//! Firmata boards over TCP
//!
//! Minimal link used by the gateway binary: dial, version handshake, a
//! writer task that owns the socket's write half, and a reader task that
//! copies board output to every attached proxy pipe. Command encoding beyond
//! a couple of pin writes is left to the proxied clients.
//!
//! Each pipe has its own bounded queue and writer task. The board reader
//! never waits on a pipe: a pipe whose queue is full gets detached.

pub mod protocol;

pub use protocol::PinMode;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::board::{BoardLink, Connector};
use crate::proxy::ProxyStream;
use crate::types::{NexusError, Result};

const OUTBOUND_QUEUE: usize = 256;
const READ_BUF: usize = 1024;
/// Board output chunks buffered per pipe before it is detached
const PIPE_QUEUE: usize = 64;
/// Bytes tolerated before the version reply shows up
const MAX_HANDSHAKE_BYTES: usize = 4096;

/// Dials boards over plain TCP
#[derive(Debug, Clone, Default)]
pub struct FirmataConnector;

impl FirmataConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for FirmataConnector {
    type Link = Firmata;

    async fn dial(&self, address: &str) -> Result<Firmata> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| NexusError::Connect(format!("dial {}: {}", address, e)))?;
        let _ = stream.set_nodelay(true);
        Ok(Firmata::new(address.to_string(), stream))
    }

    async fn handshake(&self, link: &Firmata) -> Result<()> {
        link.handshake().await
    }
}

#[derive(Clone)]
struct PipeEntry {
    id: u64,
    stream: Arc<ProxyStream>,
    queue: mpsc::Sender<Bytes>,
}

/// Attached proxy pipes, keyed so a finished pipe can remove itself
#[derive(Clone, Default)]
struct PipeRegistry {
    next_id: Arc<AtomicU64>,
    pipes: Arc<StdMutex<Vec<PipeEntry>>>,
}

impl PipeRegistry {
    fn insert(&self, stream: Arc<ProxyStream>, queue: mpsc::Sender<Bytes>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pipes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PipeEntry { id, stream, queue });
        id
    }

    /// Drop the pipe's queue and close its stream
    fn detach(&self, id: u64) {
        let removed: Vec<PipeEntry> = {
            let mut pipes = self.pipes.lock().unwrap_or_else(|e| e.into_inner());
            let (gone, kept): (Vec<_>, Vec<_>) =
                pipes.drain(..).partition(|entry| entry.id == id);
            *pipes = kept;
            gone
        };
        for entry in removed {
            entry.stream.close();
        }
    }

    fn detach_all(&self) {
        let removed = std::mem::take(&mut *self.pipes.lock().unwrap_or_else(|e| e.into_inner()));
        for entry in removed {
            entry.stream.close();
        }
    }

    /// Queue `bytes` for every pipe without waiting. Pipes that are full or
    /// gone are detached.
    fn fan_out(&self, bytes: Bytes) {
        let snapshot = self.pipes.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for entry in snapshot {
            match entry.queue.try_send(bytes.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Proxy pipe {} is not keeping up, detaching", entry.id);
                    self.detach(entry.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => self.detach(entry.id),
            }
        }
    }

    fn len(&self) -> usize {
        self.pipes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A connected Firmata board
pub struct Firmata {
    address: String,
    outbound: mpsc::Sender<Bytes>,
    /// Held until the handshake hands it to the reader task
    reader: Mutex<Option<OwnedReadHalf>>,
    pipes: PipeRegistry,
    closed: Arc<watch::Sender<bool>>,
    version: OnceLock<(u8, u8)>,
}

impl Firmata {
    fn new(address: String, stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        tokio::spawn(write_loop(write_half, rx, Arc::clone(&closed)));

        Self {
            address,
            outbound,
            reader: Mutex::new(Some(read_half)),
            pipes: PipeRegistry::default(),
            closed,
            version: OnceLock::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Firmata protocol version reported during the handshake
    pub fn version(&self) -> Option<(u8, u8)> {
        self.version.get().copied()
    }

    /// Number of proxy pipes currently attached
    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }

    pub fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        self.send(Bytes::copy_from_slice(&protocol::set_pin_mode(pin, mode)))
    }

    pub fn digital_write(&self, pin: u8, high: bool) -> Result<()> {
        self.send(Bytes::copy_from_slice(&protocol::digital_write(pin, high)))
    }

    /// Queue raw bytes for the board without waiting
    pub fn send(&self, bytes: Bytes) -> Result<()> {
        self.outbound.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                NexusError::Internal(format!("board {} output queue full", self.address))
            }
            mpsc::error::TrySendError::Closed(_) => {
                NexusError::Connect(format!("board {} connection closed", self.address))
            }
        })
    }

    async fn handshake(&self) -> Result<()> {
        let mut reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| NexusError::Connect("handshake already performed".into()))?;

        self.send(Bytes::from_static(&[protocol::REPORT_VERSION]))?;

        let mut received = Vec::new();
        let mut chunk = [0u8; 64];
        let version = loop {
            let n = reader
                .read(&mut chunk)
                .await
                .map_err(|e| NexusError::Connect(format!("handshake read: {}", e)))?;
            if n == 0 {
                return Err(NexusError::Connect(format!(
                    "{} closed during handshake",
                    self.address
                )));
            }
            received.extend_from_slice(&chunk[..n]);
            if let Some(version) = protocol::find_version(&received) {
                break version;
            }
            if received.len() > MAX_HANDSHAKE_BYTES {
                return Err(NexusError::Connect(format!(
                    "{} sent no version reply",
                    self.address
                )));
            }
        };

        let _ = self.version.set(version);
        info!(
            "Firmata handshake with {} done (protocol {}.{})",
            self.address, version.0, version.1
        );

        tokio::spawn(read_loop(reader, self.pipes.clone(), Arc::clone(&self.closed)));
        Ok(())
    }
}

impl BoardLink for Firmata {
    fn closed(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.closed.subscribe();
        Box::pin(async move { wait_closed(&mut rx).await })
    }

    fn attach_proxy(&self, pipe: ProxyStream) {
        let pipe = Arc::new(pipe);
        let (queue, rx) = mpsc::channel(PIPE_QUEUE);
        let id = self.pipes.insert(Arc::clone(&pipe), queue);
        debug!("Proxy pipe {} attached to {}", id, self.address);

        tokio::spawn(pipe_writer(id, Arc::clone(&pipe), rx));
        tokio::spawn(pipe_reader(
            id,
            pipe,
            self.pipes.clone(),
            self.outbound.clone(),
            self.closed.subscribe(),
        ));
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Client to board: forward everything the pipe's peer sends
async fn pipe_reader(
    id: u64,
    pipe: Arc<ProxyStream>,
    pipes: PipeRegistry,
    outbound: mpsc::Sender<Bytes>,
    mut closed: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = tokio::select! {
            _ = wait_closed(&mut closed) => break,
            read = pipe.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        tokio::select! {
            _ = wait_closed(&mut closed) => break,
            sent = outbound.send(Bytes::copy_from_slice(&buf[..n])) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    pipes.detach(id);
    debug!("Proxy pipe {} detached", id);
}

/// Board to client: drain the pipe's queue until it is detached
async fn pipe_writer(id: u64, pipe: Arc<ProxyStream>, mut rx: mpsc::Receiver<Bytes>) {
    loop {
        let bytes = tokio::select! {
            _ = pipe.closed() => break,
            bytes = rx.recv() => match bytes {
                Some(bytes) => bytes,
                None => break,
            },
        };
        tokio::select! {
            _ = pipe.closed() => break,
            written = pipe.write(&bytes) => {
                if let Err(e) = written {
                    debug!("Proxy pipe {} write failed: {}", id, e);
                    pipe.close();
                    break;
                }
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut closed_rx = closed.subscribe();
    loop {
        tokio::select! {
            _ = wait_closed(&mut closed_rx) => break,
            msg = rx.recv() => match msg {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        debug!("Board write failed: {}", e);
                        closed.send_replace(true);
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    pipes: PipeRegistry,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut closed_rx = closed.subscribe();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = tokio::select! {
            _ = wait_closed(&mut closed_rx) => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("Board read failed: {}", e);
                    break;
                }
            },
        };

        pipes.fan_out(Bytes::copy_from_slice(&buf[..n]));
    }
    closed.send_replace(true);
    pipes.detach_all();
}
