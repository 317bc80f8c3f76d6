//! Wharf Connection - connection, transaction and pool lifecycle
//!
//! This crate wraps backend sessions in [`Connection`]s, groups them into
//! bounded [`ConnectionPool`]s and keeps named pools in a
//! [`ConnectionManager`].

mod connection;
pub mod health;
mod manager;
pub mod pool;
mod settings;
mod transaction;

#[cfg(test)]
mod testing;

pub use connection::Connection;
pub use health::{HealthStatus, HealthThresholds, PingError, PingResult, ping_connection};
pub use manager::ConnectionManager;
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use settings::{PoolDefinition, WharfSettings};
pub use transaction::{Transaction, TransactionStatus};
pub use wharf_core::{
    Backend, ConnectionFactory, ExecuteResult, FnFactory, PoolStats, QueryResult, Result, Row,
    Value, WharfError,
};
