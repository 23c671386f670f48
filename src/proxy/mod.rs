//! Proxy pipes
//!
//! External byte streams that get tunneled onto a board connection.

pub mod stream;

pub use stream::ProxyStream;

use futures::future::BoxFuture;

/// Resolves when the remote peer of a proxy pipe goes away on its own
pub type PeerClosed = BoxFuture<'static, ()>;
