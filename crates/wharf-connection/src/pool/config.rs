//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wharf_core::{Result, WharfError};

/// Configuration for a connection pool
///
/// Controls pool sizing and timeouts. Deserializes from either the
/// snake_case field names or the camelCase keys used by application
/// settings files (`min`, `max`, `acquireTimeoutMillis`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections created eagerly when the pool starts
    #[serde(alias = "min")]
    min_size: usize,
    /// Hard ceiling on total connections
    #[serde(alias = "max")]
    max_size: usize,
    /// Maximum wait in `acquire` once the pool is saturated
    #[serde(alias = "acquireTimeoutMillis")]
    acquire_timeout_ms: u64,
    /// Idle time after which `evict_idle` may destroy a connection
    #[serde(alias = "idleTimeoutMillis")]
    idle_timeout_ms: u64,
    /// Optional bound on how long the factory may take to open a backend
    #[serde(alias = "createTimeoutMillis", skip_serializing_if = "Option::is_none")]
    create_timeout_ms: Option<u64>,
}

impl PoolConfig {
    /// Create a configuration with the given sizes and default timeouts.
    ///
    /// Sizes are checked by [`PoolConfig::validate`], which pool
    /// construction calls.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            acquire_timeout_ms: 30_000,
            idle_timeout_ms: 600_000,
            create_timeout_ms: None,
        }
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set a bound on connection creation in milliseconds
    pub fn with_create_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.create_timeout_ms = Some(timeout_ms);
        self
    }

    /// Get the minimum pool size
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Get the maximum pool size
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get the acquire timeout
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Get the idle timeout
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the create timeout, if any
    pub fn create_timeout(&self) -> Option<Duration> {
        self.create_timeout_ms.map(Duration::from_millis)
    }

    /// Reject sizes no pool can honor
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(WharfError::Configuration(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(WharfError::Configuration(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// min 1, max 10, acquire timeout 30s, idle timeout 10min, no create timeout
    fn default() -> Self {
        Self::new(1, 10)
    }
}
