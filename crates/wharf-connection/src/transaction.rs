//! Transaction wrapper bound to one connection

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use wharf_core::{ExecuteResult, QueryResult, Result, Value, WharfError};

use crate::Connection;
use crate::connection::generate_id;

/// Lifecycle of a transaction. `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

/// A unit of work on a single connection
///
/// Created by [`Connection::begin_transaction`]. Operations are serialized:
/// two concurrent commits cannot both reach the backend, the second one
/// observes the terminal status and fails with `InvalidState`.
pub struct Transaction {
    id: String,
    connection: Arc<Connection>,
    status: Mutex<TransactionStatus>,
    gate: tokio::sync::Mutex<()>,
}

impl Transaction {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self {
            id: generate_id("tx"),
            connection,
            status: Mutex::new(TransactionStatus::Active),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Get the transaction id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the current status
    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    /// Whether the transaction can still run statements
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// The connection this transaction runs on
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(WharfError::InvalidState(
                "transaction is not active".to_string(),
            ))
        }
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let _gate = self.gate.lock().await;
        self.ensure_active()?;
        self.connection.query(sql, params).await
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        let _gate = self.gate.lock().await;
        self.ensure_active()?;
        self.connection.execute(sql, params).await
    }

    /// Commit the transaction. On backend failure it stays `Active`.
    #[tracing::instrument(skip(self), fields(transaction_id = %self.id))]
    pub async fn commit(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.ensure_active()?;
        self.connection.commit_backend().await?;
        *self.status.lock() = TransactionStatus::Committed;
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Roll back the transaction. On backend failure it stays `Active`.
    #[tracing::instrument(skip(self), fields(transaction_id = %self.id))]
    pub async fn rollback(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.ensure_active()?;
        self.connection.rollback_backend().await?;
        *self.status.lock() = TransactionStatus::RolledBack;
        tracing::debug!("transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if *self.status.get_mut() == TransactionStatus::Active {
            tracing::warn!(
                transaction_id = %self.id,
                connection_id = %self.connection.id(),
                "transaction dropped while still active"
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("connection_id", &self.connection.id())
            .field("status", &self.status())
            .finish()
    }
}
