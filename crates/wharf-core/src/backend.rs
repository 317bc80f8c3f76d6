//! Backend capability consumed by connections

use async_trait::async_trait;

use crate::{ExecuteResult, QueryResult, Result, Value};

/// A driver-specific session that a `Connection` wraps.
///
/// Implementations report failures as `WharfError::Backend`; the connection
/// layer attaches operation and SQL context before surfacing them.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgresql", "memory")
    fn driver_name(&self) -> &str;

    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement that modifies state
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult>;

    /// Release the session.
    ///
    /// Drivers without a close primitive keep the default no-op.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Start a transaction on this session
    async fn begin(&self) -> Result<()> {
        self.execute("BEGIN", &[]).await.map(|_| ())
    }

    /// Commit the open transaction
    async fn commit(&self) -> Result<()> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    /// Roll back the open transaction
    async fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }
}
