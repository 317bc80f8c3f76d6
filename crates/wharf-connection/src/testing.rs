//! Scripted backends shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use wharf_core::{
    Backend, ConnectionFactory, ExecuteResult, QueryResult, Result, Row, Value, WharfError,
};

use crate::health::PING_QUERY;

/// Failure switches and a statement log shared by every backend a test creates
#[derive(Default)]
pub(crate) struct MockState {
    statements: Mutex<Vec<String>>,
    fail_queries: AtomicBool,
    fail_pings: AtomicBool,
    fail_close: AtomicBool,
    fail_transactions: AtomicBool,
    ping_delay: Mutex<Option<Duration>>,
    close_calls: AtomicUsize,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn fail_transactions(&self, fail: bool) {
        self.fail_transactions.store(fail, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Option<Duration>) {
        *self.ping_delay.lock() = delay;
    }

    fn record(&self, sql: &str) {
        self.statements.lock().push(sql.to_string());
    }
}

pub(crate) struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(state: Arc<MockState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.state.record(sql);
        if sql == PING_QUERY {
            let delay = *self.state.ping_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.state.fail_pings.load(Ordering::SeqCst) {
                return Err(WharfError::backend("query", "connection reset"));
            }
        } else if self.state.fail_queries.load(Ordering::SeqCst) {
            return Err(WharfError::backend("query", "no such table"));
        }
        let columns = vec!["value".to_string()];
        let row = Row::new(columns.clone(), vec![Value::Int64(1)]);
        Ok(QueryResult::new(columns, vec![row]))
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<ExecuteResult> {
        self.state.record(sql);
        let is_tx_command = matches!(sql, "BEGIN" | "COMMIT" | "ROLLBACK");
        if is_tx_command && self.state.fail_transactions.load(Ordering::SeqCst) {
            return Err(WharfError::backend("execute", "transaction command rejected"));
        }
        if !is_tx_command && self.state.fail_queries.load(Ordering::SeqCst) {
            return Err(WharfError::backend("execute", "constraint violated"));
        }
        Ok(ExecuteResult::affected(1).with_insert_id(1))
    }

    async fn close(&self) -> Result<()> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(WharfError::backend("close", "socket already torn down"));
        }
        Ok(())
    }
}

/// Factory producing `MockBackend`s bound to one shared state
#[derive(Default)]
pub(crate) struct MockFactory {
    pub state: Arc<MockState>,
    created: AtomicUsize,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self) -> Result<Box<dyn Backend>> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(WharfError::backend("connect", "connection refused"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockBackend::new(self.state.clone())))
    }
}
