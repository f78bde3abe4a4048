//! Per-node connection pool sizing

use std::time::Duration;

use serde::Deserialize;

use crate::utils::ConfigError;

/// Pool bounds applied to every node pool
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections alive at once (idle + borrowed)
    pub max_total: usize,
    /// Maximum idle connections kept after return
    pub max_idle: usize,
    /// How long `borrow` waits for a connection; 0 fails immediately
    pub borrow_wait_ms: u64,
    /// Ping idle connections before handing them out
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 8,
            max_idle: 8,
            borrow_wait_ms: 1000,
            test_on_borrow: false,
        }
    }
}

impl PoolConfig {
    pub fn borrow_wait(&self) -> Duration {
        Duration::from_millis(self.borrow_wait_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_total == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_total must be at least 1".to_string(),
            ));
        }
        if self.max_idle > self.max_total {
            return Err(ConfigError::Invalid(format!(
                "pool.max_idle ({}) cannot exceed pool.max_total ({})",
                self.max_idle, self.max_total
            )));
        }
        Ok(())
    }
}
