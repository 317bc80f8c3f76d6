//! Round-trip probe issued directly against the backend

use std::time::{Duration, Instant};

use thiserror::Error;

use super::HealthStatus;
use crate::Connection;

pub(crate) const PING_QUERY: &str = "SELECT 1";

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Why a ping failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("Ping query failed: {0}")]
    QueryFailed(String),
}

/// Ping a connection and return the round-trip time.
///
/// The probe bypasses `Connection::query` so it neither bumps the query
/// count nor refreshes last activity; an idle connection stays idle.
pub async fn ping_connection(conn: &Connection) -> PingResult {
    let backend = conn.backend().map_err(|_| PingError::ConnectionClosed)?;

    let start = Instant::now();
    match backend.query(PING_QUERY, &[]).await {
        Ok(_) => Ok(start.elapsed()),
        Err(e) => Err(PingError::QueryFailed(e.to_string())),
    }
}

/// Ping and classify with the default thresholds
pub async fn check_connection(conn: &Connection) -> HealthStatus {
    match ping_connection(conn).await {
        Ok(latency) => HealthStatus::from_latency(latency),
        Err(_) => HealthStatus::Unhealthy,
    }
}
