//! Connection wrapper around a single backend session

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;
use wharf_core::{Backend, ExecuteResult, QueryResult, Result, Value, WharfError};

use crate::health::{self, HealthStatus};
use crate::transaction::Transaction;

/// Generate an id of the form `<prefix>_<unix millis>_<8 hex chars>`.
///
/// Uniqueness is advisory; the random suffix only guards against collisions
/// between ids minted in the same millisecond.
pub(crate) fn generate_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        prefix,
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

struct Activity {
    at: DateTime<Utc>,
    instant: Instant,
}

/// A database connection wrapping one backend session
///
/// Tracks per-connection metadata (query count, last activity) and the
/// pool-owned active flag. The backend handle is released on `close`, after
/// which every operation fails with `InvalidState`.
pub struct Connection {
    id: String,
    driver_name: String,
    backend: RwLock<Option<Arc<dyn Backend>>>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Activity>,
    query_count: AtomicU64,
    active: AtomicBool,
}

impl Connection {
    /// Wrap a freshly opened backend session
    pub fn new(backend: Box<dyn Backend>) -> Self {
        let now = Utc::now();
        let driver_name = backend.driver_name().to_string();
        Self {
            id: generate_id("conn"),
            driver_name,
            backend: RwLock::new(Some(Arc::from(backend))),
            created_at: now,
            last_activity: Mutex::new(Activity {
                at: now,
                instant: Instant::now(),
            }),
            query_count: AtomicU64::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// Get the connection id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the backend driver
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// When the connection was opened
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last query or execute
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity.lock().at
    }

    /// Time elapsed since the last query or execute
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().instant.elapsed()
    }

    /// Cumulative number of queries and statements issued
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }

    /// Whether the owning pool currently has this connection checked out
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Pool-internal: flip the checked-out flag
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Whether `close` has released the backend
    pub fn is_closed(&self) -> bool {
        self.backend.read().is_none()
    }

    pub(crate) fn backend(&self) -> Result<Arc<dyn Backend>> {
        self.backend
            .read()
            .clone()
            .ok_or_else(|| WharfError::InvalidState(format!("connection {} is closed", self.id)))
    }

    fn touch(&self) {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        let mut activity = self.last_activity.lock();
        activity.at = Utc::now();
        activity.instant = Instant::now();
    }

    /// Execute a query that returns rows
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let backend = self.backend()?;
        self.touch();
        tracing::debug!(connection_id = %self.id, sql = %sql, "query");
        backend
            .query(sql, params)
            .await
            .map_err(|e| e.with_context("query", Some(sql)))
    }

    /// Execute a statement that modifies state
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        let backend = self.backend()?;
        self.touch();
        tracing::debug!(connection_id = %self.id, sql = %sql, "execute");
        backend
            .execute(sql, params)
            .await
            .map_err(|e| e.with_context("execute", Some(sql)))
    }

    /// Begin a transaction bound to this connection
    #[tracing::instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn begin_transaction(self: &Arc<Self>) -> Result<Transaction> {
        let backend = self.backend()?;
        backend
            .begin()
            .await
            .map_err(|e| e.with_context("begin", None))?;
        let tx = Transaction::new(Arc::clone(self));
        tracing::debug!(transaction_id = %tx.id(), "transaction started");
        Ok(tx)
    }

    pub(crate) async fn commit_backend(&self) -> Result<()> {
        self.backend()?
            .commit()
            .await
            .map_err(|e| e.with_context("commit", None))
    }

    pub(crate) async fn rollback_backend(&self) -> Result<()> {
        self.backend()?
            .rollback()
            .await
            .map_err(|e| e.with_context("rollback", None))
    }

    /// Health probe: a trivial round trip. Never errors.
    pub async fn ping(&self) -> bool {
        match health::ping_connection(self).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "ping failed");
                false
            }
        }
    }

    /// Classify the connection by ping latency
    pub async fn health(&self) -> HealthStatus {
        health::check_connection(self).await
    }

    /// Release the backend handle. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let backend = self.backend.write().take();
        self.set_active(false);
        match backend {
            Some(backend) => {
                tracing::debug!(connection_id = %self.id, "closing connection");
                backend
                    .close()
                    .await
                    .map_err(|e| e.with_context("close", None))
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("driver", &self.driver_name)
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .field("query_count", &self.query_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockState};

    fn connection(state: &Arc<MockState>) -> Arc<Connection> {
        Arc::new(Connection::new(Box::new(MockBackend::new(state.clone()))))
    }

    #[test]
    fn test_generate_id_format() {
        let id = generate_id("conn");
        let parts: Vec<_> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "conn");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert_ne!(generate_id("conn"), generate_id("conn"));
    }

    #[tokio::test]
    async fn test_query_updates_bookkeeping() {
        let state = MockState::new();
        let conn = connection(&state);
        let before = conn.last_activity();

        conn.query("SELECT * FROM users", &[]).await.expect("query");
        conn.execute("DELETE FROM users", &[]).await.expect("execute");

        assert_eq!(conn.query_count(), 2);
        assert!(conn.last_activity() >= before);
        assert_eq!(
            state.statements(),
            vec!["SELECT * FROM users", "DELETE FROM users"]
        );
    }

    #[tokio::test]
    async fn test_backend_failure_carries_sql() {
        let state = MockState::new();
        state.fail_queries(true);
        let conn = connection(&state);

        let err = conn.query("SELECT broken", &[]).await.unwrap_err();
        match err {
            WharfError::Backend { operation, sql, .. } => {
                assert_eq!(operation, "query");
                assert_eq!(sql.as_deref(), Some("SELECT broken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_reports_false_instead_of_erroring() {
        let state = MockState::new();
        let conn = connection(&state);
        assert!(conn.ping().await);
        assert_eq!(conn.health().await, HealthStatus::Healthy);

        state.fail_pings(true);
        assert!(!conn.ping().await);

        // pings are not counted as queries
        assert_eq!(conn.query_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let state = MockState::new();
        let conn = connection(&state);

        conn.close().await.expect("first close");
        conn.close().await.expect("second close");

        assert!(conn.is_closed());
        assert_eq!(state.close_calls(), 1);
        assert!(!conn.ping().await);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let state = MockState::new();
        let conn = connection(&state);
        conn.close().await.expect("close");

        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, WharfError::InvalidState(_)));
        assert!(conn.begin_transaction().await.is_err());
    }

    #[tokio::test]
    async fn test_close_failure_surfaces_backend_error() {
        let state = MockState::new();
        state.fail_close(true);
        let conn = connection(&state);

        let err = conn.close().await.unwrap_err();
        assert!(matches!(err, WharfError::Backend { ref operation, .. } if operation == "close"));
        // the handle is gone even though the driver complained
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_begin_failure_is_backend_error() {
        let state = MockState::new();
        state.fail_transactions(true);
        let conn = connection(&state);

        let err = conn.begin_transaction().await.unwrap_err();
        assert!(matches!(err, WharfError::Backend { ref operation, .. } if operation == "begin"));
    }
}
