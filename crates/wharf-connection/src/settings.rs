//! Named pool definitions loaded from TOML

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use wharf_core::{Result, WharfError};

use crate::pool::PoolConfig;

/// One pool entry in a settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDefinition {
    /// Backend provider name, resolved by the application (e.g. "sqlite")
    pub provider: String,
    /// Provider-specific target such as a file path or URL
    pub target: String,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Application-level database settings
///
/// ```toml
/// [pools.main]
/// provider = "sqlite"
/// target = "app.db"
///
/// [pools.main.pool]
/// min = 1
/// max = 8
/// acquireTimeoutMillis = 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WharfSettings {
    #[serde(default)]
    pools: BTreeMap<String, PoolDefinition>,
}

impl WharfSettings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_toml_str(&content)?;
        tracing::debug!(pools = settings.pools.len(), "settings loaded");
        Ok(settings)
    }

    pub fn with_pool(mut self, name: impl Into<String>, definition: PoolDefinition) -> Self {
        self.pools.insert(name.into(), definition);
        self
    }

    /// Pool definitions in name order
    pub fn pools(&self) -> impl Iterator<Item = (&str, &PoolDefinition)> {
        self.pools.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn pool(&self, name: &str) -> Option<&PoolDefinition> {
        self.pools.get(name)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, definition) in &self.pools {
            definition.pool.validate().map_err(|e| {
                WharfError::Configuration(format!("pool '{name}': {e}"))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SETTINGS: &str = r#"
        [pools.main]
        provider = "sqlite"
        target = "app.db"

        [pools.main.pool]
        min = 2
        max = 8
        acquireTimeoutMillis = 5000

        [pools.reports]
        provider = "sqlite"
        target = ":memory:"
    "#;

    #[test]
    fn test_parse_named_pools() {
        let settings = WharfSettings::from_toml_str(SETTINGS).expect("parse");

        let names: Vec<_> = settings.pools().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["main", "reports"]);

        let main = settings.pool("main").expect("main");
        assert_eq!(
            main.pool,
            PoolConfig::new(2, 8).with_acquire_timeout_ms(5000)
        );
        assert_eq!(settings.pool("reports").map(|d| &d.pool), Some(&PoolConfig::default()));
    }

    #[test]
    fn test_invalid_pool_is_configuration_error() {
        let err = WharfSettings::from_toml_str(
            r#"
            [pools.broken]
            provider = "sqlite"
            target = ":memory:"
            pool = { min = 4, max = 2 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, WharfError::Configuration(ref msg) if msg.contains("broken")));
    }

    #[test]
    fn test_malformed_toml() {
        let err = WharfSettings::from_toml_str("[pools.main\nprovider =").unwrap_err();
        assert!(matches!(err, WharfError::Toml(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(SETTINGS.as_bytes()).expect("write");

        let settings = WharfSettings::load(file.path()).expect("load");
        assert_eq!(settings.pools().count(), 2);

        let missing = WharfSettings::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(WharfError::Io(_))));
    }
}
