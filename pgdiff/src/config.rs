//! Configuration handling for pgdiff

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Load configuration from a TOML or YAML file, picked by extension
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("toml")
        .to_lowercase();

    let config: Config = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?,
        _ => toml::from_str(&config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?,
    };

    Ok(config)
}

/// Represents the complete pgdiff configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Shared connection settings
    #[serde(default)]
    pub database: ConnectionConfig,
    /// Overrides for the schema being copied from
    pub source: Option<ConnectionConfig>,
    /// Overrides for the schema being migrated
    pub target: Option<ConnectionConfig>,
    #[serde(default)]
    pub diff: DiffOptions,
    pub logging: Option<LoggingConfig>,
    /// One-off defaults by table, then column, as literals
    #[serde(default)]
    pub defaults: HashMap<String, HashMap<String, String>>,
}

impl Config {
    /// Effective connection settings for the source side
    pub fn source_connection(&self) -> ConnectionConfig {
        self.database.overlay(self.source.as_ref())
    }

    /// Effective connection settings for the target side
    pub fn target_connection(&self) -> ConnectionConfig {
        self.database.overlay(self.target.as_ref())
    }
}

/// Database connection configuration
///
/// Every field is optional; unset fields fall back to the libpq
/// environment (`PGHOST`, `PGUSER`, ...) when connecting.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl ConnectionConfig {
    /// Settings of `side` where present, `self` elsewhere
    pub fn overlay(&self, side: Option<&ConnectionConfig>) -> ConnectionConfig {
        let Some(side) = side else {
            return self.clone();
        };
        ConnectionConfig {
            url: side.url.clone().or_else(|| self.url.clone()),
            host: side.host.clone().or_else(|| self.host.clone()),
            port: side.port.or(self.port),
            database: side.database.clone().or_else(|| self.database.clone()),
            user: side.user.clone().or_else(|| self.user.clone()),
            password: side.password.clone().or_else(|| self.password.clone()),
            pool_size: side.pool_size.or(self.pool_size),
            timeout_seconds: side.timeout_seconds.or(self.timeout_seconds),
        }
    }
}

/// Switches that change what the differ reports
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DiffOptions {
    /// Match constraints by content instead of name
    pub normalize_constraints: bool,
    /// Never emit `ALTER SEQUENCE`
    pub no_alter_sequences: bool,
    /// Ask on the terminal for defaults of columns turning `NOT NULL`
    pub prompt_for_defaults: bool,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn loads_toml_with_side_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[database]
host = "localhost"
user = "postgres"
database = "app"

[target]
database = "app_staging"

[diff]
normalize_constraints = true

[defaults.users]
created_at = "NOW"
"#
        )
        .unwrap();

        let config = load_from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.diff.normalize_constraints);
        assert!(!config.diff.no_alter_sequences);
        assert_eq!(config.source_connection().database.as_deref(), Some("app"));
        assert_eq!(config.target_connection().database.as_deref(), Some("app_staging"));
        assert_eq!(config.target_connection().host.as_deref(), Some("localhost"));
        assert_eq!(config.defaults["users"]["created_at"], "NOW");
    }

    #[test]
    fn loads_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "database:\n  host: db\n  port: 5433\ndiff:\n  no_alter_sequences: true\n"
        )
        .unwrap();

        let config = load_from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.database.port, Some(5433));
        assert!(config.diff.no_alter_sequences);
        assert!(config.logging.is_none());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(matches!(
            load_from_file(path.to_str().unwrap()),
            Err(Error::ConfigError(_))
        ));
    }
}
