//! Shared types for Nexus

pub mod error;

pub use error::{NexusError, Result};
