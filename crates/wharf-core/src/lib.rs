//! wharf core - shared abstractions for the connection pooling layer
//!
//! This crate defines the types every other wharf crate depends on:
//!
//! - `Backend` - the driver capability a pooled connection wraps
//! - `ConnectionFactory` - opens new backend sessions on demand
//! - `WharfError` - the error taxonomy for pools, connections and transactions
//! - `PoolStats` - the read-only statistics snapshot exposed to monitoring
//! - Common value types like `Value`, `Row`, `QueryResult`

mod backend;
mod error;
mod factory;
mod stats;
mod types;

pub use backend::*;
pub use error::*;
pub use factory::*;
pub use stats::*;
pub use types::*;
