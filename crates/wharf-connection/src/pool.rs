//! Connection pooling
//!
//! A [`ConnectionPool`] owns a bounded set of [`Connection`](crate::Connection)s
//! for one backend target. Callers either `acquire`/`release` explicitly or
//! take a [`PooledConnection`] guard from `get`.
//!
//! ```ignore
//! use wharf_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(1, 8).with_acquire_timeout_ms(5_000);
//! let pool = ConnectionPool::new("main", config, factory).await?;
//!
//! let conn = pool.acquire().await?;
//! conn.query("SELECT 1", &[]).await?;
//! pool.release(&conn).await?;
//! ```

mod config;
mod pool;
mod waiter;


pub use config::PoolConfig;
pub use pool::{ConnectionPool, PooledConnection};
