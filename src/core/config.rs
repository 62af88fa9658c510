//! Server configuration.
//!
//! Options mirror the `crest-server` command line. The defaults favor
//! safety: high log durability and high read consistency.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Durability / consistency tiers shared by the log backend and the
/// read gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// No gating (reads) / buffered writes without fsync (log).
    Low,
    /// Leader-only reads / fsync on a short timer.
    Medium,
    /// Log-serialized reads / fsync on every append.
    High,
}

impl std::str::FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => bail!("invalid level '{other}' (expected low, medium, or high)"),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Log verbosity recognized by the server binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Quiet,
    Warning,
    Notice,
    Verbose,
    Debug,
}

impl LogLevel {
    /// Translate to a tracing env-filter directive.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Quiet => "off",
            Self::Warning => "warn",
            Self::Notice => "info",
            Self::Verbose => "debug",
            Self::Debug => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" => Ok(Self::Quiet),
            "warning" => Ok(Self::Warning),
            "notice" => Ok(Self::Notice),
            "verbose" => Ok(Self::Verbose),
            "debug" => Ok(Self::Debug),
            other => bail!("invalid loglevel '{other}'"),
        }
    }
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP bind port.
    pub port: u16,

    /// Data directory for the replicated log and snapshots.
    pub dir: PathBuf,

    /// fsync discipline of the log backend.
    pub durability: Level,

    /// Read gate level.
    pub consistency: Level,

    /// Verbosity of the server log.
    pub loglevel: LogLevel,

    /// Address of an existing cluster member to join.
    pub join: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7481,
            dir: PathBuf::from("data"),
            durability: Level::High,
            consistency: Level::High,
            loglevel: LogLevel::Notice,
            join: None,
        }
    }
}

impl Config {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port must be nonzero");
        }
        if self.dir.as_os_str().is_empty() {
            bail!("data directory must not be empty");
        }
        Ok(())
    }

    /// The address advertised to clients for leader redirects.
    pub fn advertise_addr(&self) -> String {
        format!(":{}", self.port)
    }
}
