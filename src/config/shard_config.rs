//! Shard ring configuration (client-side sharding, no cluster bus)

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::pool_config::PoolConfig;
use super::router_config::{AuthConfig, NodeAddress};
use crate::utils::ConfigError;

/// One shard on the ring
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardInfo {
    pub address: NodeAddress,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Named shards get virtual nodes `<name>*<n>`; unnamed ones `SHARD-<i>-NODE-<n>`
    #[serde(default)]
    pub name: Option<String>,
}

fn default_weight() -> u32 {
    1
}

impl ShardInfo {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            weight: 1,
            name: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub shards: Vec<ShardInfo>,
    /// Hash only the `{tag}` part of keys that carry one
    pub use_key_tags: bool,
    pub auth: Option<AuthConfig>,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub pool: PoolConfig,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            shards: Vec::new(),
            use_key_tags: true,
            auth: None,
            connect_timeout_ms: 2000,
            socket_timeout_ms: 2000,
            pool: PoolConfig::default(),
        }
    }
}

impl ShardConfig {
    pub fn with_shards(shards: Vec<ShardInfo>) -> Self {
        Self {
            shards,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ShardConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shards.is_empty() {
            return Err(ConfigError::Invalid("at least one shard is required".to_string()));
        }
        if let Some(shard) = self.shards.iter().find(|s| s.weight == 0) {
            return Err(ConfigError::Invalid(format!(
                "shard {} has weight 0",
                shard.address
            )));
        }
        self.pool.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}
