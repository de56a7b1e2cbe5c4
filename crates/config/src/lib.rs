//! Host configuration: listen port, data directory, and the timing knobs
//! for the supervisor and session sweep.
//!
//! Precedence is CLI flags over environment (`MCP_HOST_PORT`,
//! `MCP_DATA_DIR`) over defaults. All spec'd timing constants live here as
//! `Default` impls so tests can shrink them without touching production
//! code paths.

use std::{path::PathBuf, time::Duration};

pub mod timings;

pub use timings::{SessionTimings, SupervisorTimings};

/// Preferred listen port when none is configured.
pub const DEFAULT_LISTEN_PORT: u16 = 4040;
/// Upper bound of the listen-port scan when the preferred port is taken.
pub const DEFAULT_LISTEN_PORT_MAX: u16 = 4099;

/// Range of loopback ports handed out to server instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            low: 40_000,
            high: 49_999,
        }
    }
}

/// Top-level host configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Preferred listen port; the host scans up to `listen_port_max` when
    /// this one is taken.
    pub listen_port: u16,
    pub listen_port_max: u16,
    /// Directory holding the persisted store files.
    pub data_dir: PathBuf,
    /// Instance port range.
    pub ports: PortRange,
    /// Minimum time a released port stays out of circulation.
    pub port_release_grace: Duration,
    pub supervisor: SupervisorTimings,
    pub sessions: SessionTimings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            listen_port_max: DEFAULT_LISTEN_PORT_MAX,
            data_dir: default_data_dir(),
            ports: PortRange::default(),
            port_release_grace: Duration::from_millis(500),
            supervisor: SupervisorTimings::default(),
            sessions: SessionTimings::default(),
        }
    }
}

impl HostConfig {
    /// Build a config from the process environment. Only `MCP_HOST_PORT`
    /// and `MCP_DATA_DIR` are read; everything else keeps its default.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = std::env::var("MCP_HOST_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            config.listen_port = port;
        }
        if let Ok(dir) = std::env::var("MCP_DATA_DIR")
            && !dir.is_empty()
        {
            config.data_dir = PathBuf::from(dir);
        }
        config
    }

    /// Path of a named store file inside the data directory.
    #[must_use]
    pub fn store_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.json"))
    }

    /// Root directory for a server's installed package tree.
    #[must_use]
    pub fn server_root(&self, server_id: &str) -> PathBuf {
        self.data_dir.join("servers").join(server_id)
    }
}

/// Platform data directory for the host, falling back to `.mcphost` in the
/// working directory when the platform dirs cannot be resolved.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "mcphost")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".mcphost"))
}
