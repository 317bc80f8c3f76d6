//! Provider selection by name

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wharf_core::{ConnectionFactory, Result, WharfError};

use crate::backend::{MEMORY_TARGET, SqliteFactory};

/// Backend implementations selectable from settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProvider {
    /// SQLite database file; the target is its path
    Sqlite,
    /// Private in-memory SQLite database per connection; the target is ignored
    Memory,
}

impl BackendProvider {
    pub fn name(&self) -> &'static str {
        match self {
            BackendProvider::Sqlite => "sqlite",
            BackendProvider::Memory => "memory",
        }
    }

    /// Factory opening sessions against `target`
    pub fn factory(&self, target: &str) -> Arc<dyn ConnectionFactory> {
        match self {
            BackendProvider::Sqlite => Arc::new(SqliteFactory::new(target)),
            BackendProvider::Memory => Arc::new(SqliteFactory::new(MEMORY_TARGET)),
        }
    }

    /// Parse a provider name and build its factory in one step
    pub fn resolve(provider: &str, target: &str) -> Result<Arc<dyn ConnectionFactory>> {
        Ok(provider.parse::<BackendProvider>()?.factory(target))
    }
}

impl FromStr for BackendProvider {
    type Err = WharfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(BackendProvider::Sqlite),
            "memory" | "sqlite-memory" => Ok(BackendProvider::Memory),
            other => Err(WharfError::Configuration(format!(
                "unknown backend provider '{other}'"
            ))),
        }
    }
}

impl fmt::Display for BackendProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
