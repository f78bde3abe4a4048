//! Router configuration
//!
//! Everything the routing core consumes: seeds, pool sizing, timeouts,
//! the attempt budget and the read preference. Loadable from YAML; all
//! durations are expressed in milliseconds.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::pool_config::PoolConfig;
use crate::utils::ConfigError;

/// Node address (`host:port`), the identity key for pools and topology entries
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = ConfigError;

    /// Parse `host:port`; the port is taken after the last colon so that
    /// bare IPv6 hosts keep their inner colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidAddress(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(ConfigError::InvalidAddress(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(addr: NodeAddress) -> Self {
        addr.to_string()
    }
}

/// Authentication sent on every new connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthConfig {
    pub password: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Where read-only commands may be served from
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPreference {
    /// Always read from the slot owner
    #[default]
    Primary,
    /// Read from a replica of the slot owner, falling back to the owner
    Replica,
    /// Read from the owner or any of its replicas
    Any,
}

/// Complete router configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    // Discovery
    pub seeds: Vec<NodeAddress>,
    pub require_full_coverage: bool,
    pub topology_refresh_period_ms: Option<u64>,

    // Connection
    pub auth: Option<AuthConfig>,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub pool: PoolConfig,

    // Routing
    pub max_attempts: u32,
    pub max_total_retries_ms: u64,
    pub read_preference: ReadPreference,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            require_full_coverage: true,
            topology_refresh_period_ms: None,
            auth: None,
            connect_timeout_ms: 2000,
            socket_timeout_ms: 2000,
            pool: PoolConfig::default(),
            max_attempts: 5,
            max_total_retries_ms: 10_000,
            read_preference: ReadPreference::Primary,
        }
    }
}

impl RouterConfig {
    /// Configuration with the given seeds and defaults everywhere else
    pub fn with_seeds(seeds: Vec<NodeAddress>) -> Self {
        Self {
            seeds,
            ..Self::default()
        }
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one seed node is required".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.topology_refresh_period_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "topology_refresh_period_ms must be positive when set".to_string(),
            ));
        }

        self.pool.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn max_total_retries(&self) -> Duration {
        Duration::from_millis(self.max_total_retries_ms)
    }

    pub fn topology_refresh_period(&self) -> Option<Duration> {
        self.topology_refresh_period_ms.map(Duration::from_millis)
    }
}
