//! WolfQuorum Configuration
//!
//! This module provides configuration structures for the WolfQuorum
//! vote-weighted quorum service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::{NodeId, LOCAL_NODE_ID, QUORUM_DEVICE_ID};

/// Default expected votes when none are configured
pub const DEFAULT_EXPECTED_VOTES: u32 = 1024;

/// Main WolfQuorum configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfQuorumConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Quorum policy and vote configuration
    #[serde(default)]
    pub quorum: QuorumSettings,

    /// Local client IPC configuration
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Group membership node id of this process
    pub id: NodeId,
}

/// Quorum configuration keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumSettings {
    /// Expected votes of the full cluster
    #[serde(default = "default_expected_votes")]
    pub expected_votes: u32,

    /// Votes carried by this node
    #[serde(default = "default_votes")]
    pub votes: u32,

    /// Allow either of exactly two nodes to stay quorate alone
    #[serde(default)]
    pub two_node: bool,

    /// Withhold quorum until every expected vote has been seen once
    #[serde(default)]
    pub wait_for_all: bool,

    /// Break exact half splits towards the lowest node id (implies wait_for_all)
    #[serde(default)]
    pub auto_tie_breaker: bool,

    /// Recalculate expected votes after a shrinking partition settles
    #[serde(default)]
    pub last_man_standing: bool,

    /// Settling window for last man standing, in milliseconds
    #[serde(default = "default_window_ms")]
    pub last_man_standing_window_ms: u64,

    /// Quorum device liveness poll interval, in milliseconds
    #[serde(default = "default_window_ms")]
    pub quorumdev_poll_ms: u64,

    /// Time after which an unfinished leave is rescinded, in milliseconds (0 = never)
    #[serde(default = "default_window_ms")]
    pub leaving_timeout_ms: u64,
}

/// Local client IPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Enable the IPC listener
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// IPC bind address
    #[serde(default = "default_ipc_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_expected_votes() -> u32 {
    DEFAULT_EXPECTED_VOTES
}

fn default_votes() -> u32 {
    1
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_ipc_address() -> String {
    "127.0.0.1:5410".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for QuorumSettings {
    fn default() -> Self {
        Self {
            expected_votes: default_expected_votes(),
            votes: default_votes(),
            two_node: false,
            wait_for_all: false,
            auto_tie_breaker: false,
            last_man_standing: false,
            last_man_standing_window_ms: default_window_ms(),
            quorumdev_poll_ms: default_window_ms(),
            leaving_timeout_ms: default_window_ms(),
        }
    }
}

impl QuorumSettings {
    /// Last man standing window as Duration
    pub fn last_man_standing_window(&self) -> Duration {
        Duration::from_millis(self.last_man_standing_window_ms)
    }

    /// Quorum device poll interval as Duration
    pub fn quorumdev_poll(&self) -> Duration {
        Duration::from_millis(self.quorumdev_poll_ms)
    }

    /// Leave timeout as Duration, `None` when rescinding is disabled
    pub fn leaving_timeout(&self) -> Option<Duration> {
        (self.leaving_timeout_ms > 0).then(|| Duration::from_millis(self.leaving_timeout_ms))
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_ipc_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfQuorumConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfQuorumConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id == QUORUM_DEVICE_ID || self.node.id == LOCAL_NODE_ID {
            return Err(crate::Error::Config(format!(
                "node.id {} is reserved",
                self.node.id
            )));
        }

        if self.quorum.quorumdev_poll_ms == 0 {
            return Err(crate::Error::Config("quorum.quorumdev_poll_ms cannot be 0".into()));
        }

        if self.ipc.enabled && self.ipc.bind_address.is_empty() {
            return Err(crate::Error::Config("ipc.bind_address cannot be empty".into()));
        }

        Ok(())
    }

    /// Render a starter configuration for a standalone node
    pub fn template(node_id: NodeId) -> String {
        format!(
            r#"# WolfQuorum configuration

[node]
id = {node_id}

[quorum]
expected_votes = 1
votes = 1
two_node = false
wait_for_all = false
auto_tie_breaker = false
last_man_standing = false
last_man_standing_window_ms = 10000
quorumdev_poll_ms = 10000
leaving_timeout_ms = 10000

[ipc]
enabled = true
bind_address = "{ipc}"

[logging]
level = "info"
format = "pretty"
"#,
            ipc = default_ipc_address(),
        )
    }
}
