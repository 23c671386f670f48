//! Configuration for Nexus
//!
//! Process settings come from CLI arguments and environment variables via
//! clap. The board list and pin groups come from a JSON file.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::BoardSettings;
use crate::types::{NexusError, Result};

/// Nexus - gateway for Firmata boards reachable over TCP
#[derive(Parser, Debug, Clone)]
#[command(name = "nexus")]
#[command(about = "Multiplexes Firmata board connections behind one HTTP endpoint")]
pub struct Args {
    /// Board configuration file (JSON). `$VAR` and `${VAR}` are expanded.
    #[arg(long, env = "NEXUS_CONFIG", default_value = "$HOME/.hybrid/nexus.json")]
    pub config: String,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:18888")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Deadline for dialing a board plus its handshake, in milliseconds
    #[arg(long, env = "DIAL_TIMEOUT_MS", default_value = "10000")]
    pub dial_timeout_ms: u64,

    /// Pause after a failed connect attempt, in milliseconds
    #[arg(long, env = "RECONNECT_BACKOFF_MS", default_value = "1000")]
    pub reconnect_backoff_ms: u64,

    /// Maximum queued board jobs
    #[arg(long, env = "JOB_QUEUE_SIZE", default_value = "128")]
    pub job_queue_size: usize,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.dial_timeout_ms == 0 {
            return Err("DIAL_TIMEOUT_MS must be greater than zero".into());
        }
        if self.reconnect_backoff_ms == 0 {
            return Err("RECONNECT_BACKOFF_MS must be greater than zero".into());
        }
        if self.job_queue_size == 0 {
            return Err("JOB_QUEUE_SIZE must be greater than zero".into());
        }
        Ok(())
    }

    /// Config file path with environment variables expanded
    pub fn config_path(&self) -> PathBuf {
        PathBuf::from(expand_env(&self.config))
    }

    pub fn board_settings(&self) -> BoardSettings {
        BoardSettings {
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            job_queue_size: self.job_queue_size,
        }
    }
}

/// One board entry in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoardInfo {
    /// Board model, selects the pin table
    pub model: String,
    /// Dial address, `host:port`
    pub addr: String,
    /// Unique board name referenced by groups
    pub name: String,
}

/// One pin inside a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PinInfo {
    /// Name of the board the pin lives on
    pub board: String,
    /// Pin name from the board model, e.g. `PA5`
    #[serde(rename = "ID")]
    pub id: String,
    /// Display name
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInfo {
    pub name: String,
    #[serde(default)]
    pub pins: Vec<PinInfo>,
}

/// Board configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub board_infos: Vec<BoardInfo>,
    #[serde(default)]
    pub group_infos: Vec<GroupInfo>,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| NexusError::Config(format!("invalid config: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NexusError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}

/// Expand `$VAR` and `${VAR}`; unset variables expand to nothing
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        }

        if name.is_empty() {
            out.push('$');
        } else {
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }
    out
}
