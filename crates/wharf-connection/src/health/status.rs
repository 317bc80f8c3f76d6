//! Health status classification

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health of a connection as observed by its last probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Responding, but slowly
    Degraded,
    /// Not responding or far too slow
    Unhealthy,
}

impl HealthStatus {
    /// Classify latency using [`HealthThresholds::default`]
    pub fn from_latency(latency: Duration) -> Self {
        Self::from_latency_with_thresholds(latency, &HealthThresholds::default())
    }

    pub fn from_latency_with_thresholds(latency: Duration, thresholds: &HealthThresholds) -> Self {
        if latency <= thresholds.healthy {
            HealthStatus::Healthy
        } else if latency <= thresholds.degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// `Healthy` and `Degraded` connections can still serve queries
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

/// Latency cut-offs for [`HealthStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthThresholds {
    pub healthy: Duration,
    pub degraded: Duration,
}

impl HealthThresholds {
    /// The degraded bound is clamped so it never sits below the healthy one.
    pub fn new(healthy_ms: u64, degraded_ms: u64) -> Self {
        Self {
            healthy: Duration::from_millis(healthy_ms),
            degraded: Duration::from_millis(degraded_ms.max(healthy_ms)),
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::new(100, 500)
    }
}
