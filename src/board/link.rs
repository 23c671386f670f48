//! Device-link seam
//!
//! The connection actor only needs to dial, handshake, notice a lost
//! connection, attach proxy pipes, and close. Everything about the wire
//! protocol stays behind these traits.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::proxy::ProxyStream;
use crate::types::Result;

/// Opens links to boards
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: BoardLink;

    /// Open a transport connection to `address`
    async fn dial(&self, address: &str) -> Result<Self::Link>;

    /// Run the protocol handshake on a freshly dialed link
    async fn handshake(&self, link: &Self::Link) -> Result<()>;
}

/// A live, handshaken board connection
pub trait BoardLink: Send + Sync + 'static {
    /// Resolves once when the connection is lost or closed
    fn closed(&self) -> BoxFuture<'static, ()>;

    /// Tunnel `pipe` onto this connection
    fn attach_proxy(&self, pipe: ProxyStream);

    /// Tear the connection down. Idempotent.
    fn close(&self);
}
