//! Board connections
//!
//! One connection actor owns every board slot. Callers never touch a
//! board's connection directly: they submit jobs through [`Boards`] and the
//! actor runs them against whatever handle the slot holds at that moment.
//!
//! ```text
//! Boards::dispatch ──job──► ConnectionActor ──► slot.link? ─ yes ─► run op
//!        ▲                        │                          └ no ─► hand back ReadyGate
//!        └──── wait on gate ◄─────┘
//!
//! connect task ──Connected / ConnectFailed / Disconnected──► ConnectionActor
//! close watcher ──────────────Disconnected──────────────────► ConnectionActor
//! ```

mod actor;
pub mod dispatch;
pub mod gate;
pub mod link;
mod slot;

pub use dispatch::{Boards, MAX_ATTEMPTS};
pub use gate::{GateSignal, ReadyGate};
pub use link::{BoardLink, Connector};
pub use slot::Lease;

use std::time::Duration;

/// Dial plus handshake deadline
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed connect attempt before the next one
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Capacity of the job queue feeding the actor
pub const DEFAULT_JOB_QUEUE_SIZE: usize = 128;

/// One board to keep connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardTarget {
    /// Human-readable name, for logs
    pub name: String,
    /// Dial address
    pub address: String,
}

impl BoardTarget {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Connection actor tuning
#[derive(Debug, Clone)]
pub struct BoardSettings {
    /// Deadline shared by dial and handshake
    pub dial_timeout: Duration,
    /// Wait after a failed attempt before reconnecting
    pub reconnect_backoff: Duration,
    /// Maximum queued jobs before submitters wait
    pub job_queue_size: usize,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            job_queue_size: DEFAULT_JOB_QUEUE_SIZE,
        }
    }
}
