//! Database connection handling
//!
//! This module provides functionality to establish and manage database connections.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

/// A pooled PostgreSQL connection
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Create a new database connection from configuration
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let pool_size = config.pool_size.unwrap_or(2);
        let timeout_seconds = config.timeout_seconds.unwrap_or(30);

        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(timeout_seconds))
            .connect_with(connect_options(config)?)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// The underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Build connect options: the URL if one is set, then individual fields on
/// top. Anything still unset comes from the libpq environment.
pub fn connect_options(config: &ConnectionConfig) -> Result<PgConnectOptions> {
    let mut options = match &config.url {
        Some(url) => url
            .parse::<PgConnectOptions>()
            .map_err(|e| Error::ConfigError(format!("Invalid database url: {}", e)))?,
        None => PgConnectOptions::new(),
    };

    if let Some(host) = &config.host {
        options = options.host(host);
    }
    if let Some(port) = config.port {
        options = options.port(port);
    }
    if let Some(database) = &config.database {
        options = options.database(database);
    }
    if let Some(user) = &config.user {
        options = options.username(user);
    }
    if let Some(password) = &config.password {
        options = options.password(password);
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_override_url() {
        let config = ConnectionConfig {
            url: Some("postgres://alice@db.example.com:5433/app".to_string()),
            database: Some("other".to_string()),
            ..ConnectionConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.example.com");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("other"));
        assert_eq!(options.get_username(), "alice");
    }

    #[test]
    fn invalid_url_is_a_config_error() {
        let config = ConnectionConfig {
            url: Some("not a url".to_string()),
            ..ConnectionConfig::default()
        };
        assert!(matches!(connect_options(&config), Err(Error::ConfigError(_))));
    }
}
