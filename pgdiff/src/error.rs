//! Error types for pgdiff

use thiserror::Error;

/// Result type for pgdiff operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pgdiff
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Schema analysis error: {0}")]
    SchemaAnalysisError(String),

    /// A constraint type the normalizer has no key rule for. Aborts the diff.
    #[error("Unknown normalization type for constraint {name}: {constraint_type}")]
    UnknownConstraintType {
        name: String,
        constraint_type: String,
    },

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Invalid default value: {0}")]
    InvalidDefault(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),
}
