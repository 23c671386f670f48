//! Nexus - gateway for Firmata boards reachable over TCP
//!
//! Keeps a fixed set of board connections alive and lets many clients use
//! them at once:
//!
//! - **Dispatch**: run an operation against a board's live connection,
//!   waiting through reconnects up to a bounded number of attempts
//! - **Proxy pipes**: tunnel an external byte stream straight onto a board
//!
//! All board state lives in a single connection actor; see [`board`].

pub mod board;
pub mod catalog;
pub mod config;
pub mod firmata;
pub mod proxy;
pub mod server;
pub mod shutdown;
pub mod types;

pub use board::{BoardLink, BoardSettings, BoardTarget, Boards, Connector};
pub use config::{Args, Config};
pub use proxy::ProxyStream;
pub use server::{run, AppState};
pub use types::{NexusError, Result};
