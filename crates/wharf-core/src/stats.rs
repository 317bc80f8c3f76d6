//! Pool statistics snapshot

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Point-in-time statistics about a connection pool
///
/// A computed copy, safe to hand to monitoring collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of connections (idle + active)
    total: usize,
    /// Number of idle connections available in the pool
    idle: usize,
    /// Number of connections currently checked out
    active: usize,
    /// Number of acquire requests parked in the queue
    waiting: usize,
    /// Connections created over the pool's lifetime
    created: u64,
    /// Connections destroyed over the pool's lifetime
    destroyed: u64,
    /// Factory failures over the pool's lifetime
    failed: u64,
    /// Milliseconds since the pool was constructed
    uptime_ms: u64,
}

impl PoolStats {
    /// Create a snapshot from the current occupancy figures
    pub fn new(total: usize, idle: usize, active: usize, waiting: usize) -> Self {
        Self {
            total,
            idle,
            active,
            waiting,
            ..Default::default()
        }
    }

    /// Attach lifetime counters
    pub fn with_counters(mut self, created: u64, destroyed: u64, failed: u64) -> Self {
        self.created = created;
        self.destroyed = destroyed;
        self.failed = failed;
        self
    }

    /// Attach pool uptime
    pub fn with_uptime(mut self, uptime: Duration) -> Self {
        self.uptime_ms = uptime.as_millis() as u64;
        self
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }

    /// Pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }

    /// Check if every existing connection is checked out
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats_creation() {
        let stats = PoolStats::new(10, 6, 4, 2)
            .with_counters(12, 2, 1)
            .with_uptime(Duration::from_secs(3));
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.idle(), 6);
        assert_eq!(stats.active(), 4);
        assert_eq!(stats.waiting(), 2);
        assert_eq!(stats.created(), 12);
        assert_eq!(stats.destroyed(), 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.uptime(), Duration::from_secs(3));
    }

    #[test]
    fn test_pool_stats_utilization() {
        let stats = PoolStats::new(10, 5, 5, 0);
        assert!((stats.utilization() - 0.5).abs() < 0.001);

        let full_stats = PoolStats::new(10, 0, 10, 0);
        assert!((full_stats.utilization() - 1.0).abs() < 0.001);

        let empty_stats = PoolStats::default();
        assert!((empty_stats.utilization() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_pool_stats_is_full() {
        assert!(PoolStats::new(10, 0, 10, 5).is_full());
        assert!(!PoolStats::new(10, 5, 5, 0).is_full());
        assert!(!PoolStats::default().is_full());
    }

    #[test]
    fn test_pool_stats_serialization() {
        let stats = PoolStats::new(3, 1, 2, 0)
            .with_counters(4, 1, 0)
            .with_uptime(Duration::from_millis(1500));
        let json = serde_json::to_string(&stats).expect("serialize");
        assert!(json.contains("\"uptime_ms\":1500"));
        let deserialized: PoolStats = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(stats, deserialized);
    }
}
