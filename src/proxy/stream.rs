//! Proxy stream bridge
//!
//! Presents one logical bidirectional stream built from a read path and a
//! write path that may come from different places (a request body and a
//! response writer, or the two halves of one upgraded connection).
//!
//! Reads pass straight through. Writes hold a lock for the whole
//! write-then-flush so concurrent writers never interleave bytes. The bridge
//! does not own the transport: `close` only releases the read path, and it
//! interrupts a read that is still pending.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

type Inbound = Box<dyn AsyncRead + Send + Unpin>;
type Outbound = Box<dyn AsyncWrite + Send + Unpin>;

/// Bidirectional stream attached to a board as a proxy channel
pub struct ProxyStream {
    inbound: Mutex<Option<Inbound>>,
    outbound: Mutex<Outbound>,
    closed: watch::Sender<bool>,
    /// Whether the writer is flushed after every write
    flush: bool,
}

impl ProxyStream {
    /// Bridge separate read and write paths. Writes are flushed.
    pub fn new<R, W>(inbound: R, outbound: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            inbound: Mutex::new(Some(Box::new(inbound))),
            outbound: Mutex::new(Box::new(outbound)),
            closed,
            flush: true,
        }
    }

    /// Bridge a single full-duplex connection
    pub fn duplex<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (inbound, outbound) = tokio::io::split(io);
        Self::new(inbound, outbound)
    }

    /// Skip the flush step for writers with nothing to flush
    pub fn without_flush(mut self) -> Self {
        self.flush = false;
        self
    }

    /// Read from the inbound path. Returns 0 once closed or at EOF.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(0);
        }

        let mut inbound = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => return Ok(0),
            inbound = self.inbound.lock() => inbound,
        };
        let Some(reader) = inbound.as_mut() else {
            return Ok(0);
        };

        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => {}
            read = reader.read(buf) => return read,
        }

        // Closed mid-read; the pending reader is ours to drop
        inbound.take();
        Ok(0)
    }

    /// Write all of `buf` then flush, exclusive of other writers.
    ///
    /// A failed write returns immediately without flushing. Flush errors are
    /// not reported since the bytes were already accepted by the writer.
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut outbound = self.outbound.lock().await;
        outbound.write_all(buf).await?;
        if self.flush {
            if let Err(e) = outbound.flush().await {
                debug!("Proxy stream flush failed: {}", e);
            }
        }
        Ok(buf.len())
    }

    /// Release the inbound path. Never waits on a pending read; that read
    /// returns 0 and drops the reader itself.
    pub fn close(&self) {
        self.closed.send_replace(true);
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.take();
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once `close` has been called
    pub async fn closed(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

impl std::fmt::Debug for ProxyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyStream")
            .field("flush", &self.flush)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
