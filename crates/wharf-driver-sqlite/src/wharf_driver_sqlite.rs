//! SQLite backend for wharf pools

mod backend;
mod provider;

pub use backend::{SqliteBackend, SqliteFactory};
pub use provider::BackendProvider;
