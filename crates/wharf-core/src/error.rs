//! Error types for wharf

use thiserror::Error;

use crate::PoolStats;

/// Core error type for pool, connection and transaction operations
#[derive(Error, Debug)]
pub enum WharfError {
    /// The connection factory failed (or timed out) while creating a backend
    #[error("Failed to create connection for '{target}': {message}")]
    ConnectionCreate { target: String, message: String },

    /// No connection became available before the acquire deadline
    #[error(
        "Timed out after {timeout_ms}ms waiting for a connection (total: {}, active: {}, idle: {}, waiting: {})",
        .stats.total(),
        .stats.active(),
        .stats.idle(),
        .stats.waiting()
    )]
    AcquireTimeout { timeout_ms: u64, stats: PoolStats },

    #[error("Pool '{0}' is closed")]
    PoolClosed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The wrapped backend call failed
    #[error("Backend error during {operation}{}: {message}", sql_suffix(.sql))]
    Backend {
        operation: String,
        sql: Option<String>,
        message: String,
    },

    #[error("Pool '{0}' already exists")]
    DuplicatePool(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl WharfError {
    /// Build a backend error for an operation that carried no SQL text
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            sql: None,
            message: message.into(),
        }
    }

    /// Build a backend error with the offending SQL attached
    pub fn backend_with_sql(
        operation: impl Into<String>,
        sql: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Backend {
            operation: operation.into(),
            sql: Some(sql.into()),
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the operation.
    ///
    /// The pool never retries on its own; this is a hint for calling layers.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionCreate { .. } | Self::AcquireTimeout { .. }
        )
    }

    /// Pool statistics captured when an acquire timed out
    pub fn stats(&self) -> Option<&PoolStats> {
        match self {
            Self::AcquireTimeout { stats, .. } => Some(stats),
            _ => None,
        }
    }

    /// Attach operation and SQL context to a backend error.
    ///
    /// Backends report failures as `WharfError` already; errors that are not
    /// `Backend` variants are folded into one so the context is never lost.
    pub fn with_context(self, operation: &str, sql: Option<&str>) -> Self {
        match self {
            Self::Backend {
                operation: inner_op,
                sql: inner_sql,
                message,
            } => Self::Backend {
                operation: operation.to_string(),
                sql: inner_sql.or_else(|| sql.map(str::to_string)),
                message: if inner_op == operation {
                    message
                } else {
                    format!("{inner_op}: {message}")
                },
            },
            other => Self::Backend {
                operation: operation.to_string(),
                sql: sql.map(str::to_string),
                message: other.to_string(),
            },
        }
    }
}

fn sql_suffix(sql: &Option<String>) -> String {
    sql.as_deref()
        .map(|sql| format!(" ({sql})"))
        .unwrap_or_default()
}

/// Result type alias for wharf operations
pub type Result<T> = std::result::Result<T, WharfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let create = WharfError::ConnectionCreate {
            target: "main".into(),
            message: "refused".into(),
        };
        assert!(create.is_retriable());

        let timeout = WharfError::AcquireTimeout {
            timeout_ms: 50,
            stats: PoolStats::default(),
        };
        assert!(timeout.is_retriable());

        assert!(!WharfError::PoolClosed("main".into()).is_retriable());
        assert!(!WharfError::InvalidState("closed".into()).is_retriable());
        assert!(!WharfError::backend("query", "boom").is_retriable());
    }

    #[test]
    fn test_acquire_timeout_carries_stats() {
        let stats = PoolStats::new(2, 0, 2, 1).with_counters(2, 0, 0);
        let err = WharfError::AcquireTimeout {
            timeout_ms: 50,
            stats,
        };

        assert_eq!(err.stats(), Some(&stats));
        let message = err.to_string();
        assert!(message.contains("50ms"));
        assert!(message.contains("waiting: 1"));
    }

    #[test]
    fn test_backend_display_includes_sql() {
        let err = WharfError::backend_with_sql("query", "SELECT * FORM users", "syntax error");
        let message = err.to_string();
        assert!(message.contains("query"));
        assert!(message.contains("SELECT * FORM users"));
        assert!(message.contains("syntax error"));

        let err = WharfError::backend("close", "socket reset");
        assert_eq!(err.to_string(), "Backend error during close: socket reset");
    }

    #[test]
    fn test_with_context_wraps_foreign_errors() {
        let err = WharfError::InvalidState("gone".into()).with_context("execute", Some("DELETE"));
        match err {
            WharfError::Backend {
                operation,
                sql,
                message,
            } => {
                assert_eq!(operation, "execute");
                assert_eq!(sql.as_deref(), Some("DELETE"));
                assert!(message.contains("gone"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_with_context_keeps_backend_sql() {
        let err = WharfError::backend_with_sql("query", "SELECT 1", "lost")
            .with_context("query", Some("SELECT 2"));
        match err {
            WharfError::Backend { sql, message, .. } => {
                assert_eq!(sql.as_deref(), Some("SELECT 1"));
                assert_eq!(message, "lost");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
