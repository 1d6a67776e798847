//! Database module for pgdiff
//!
//! This module handles connections to the databases holding the compared schemas.

pub mod connection;

// Re-export key types
pub use connection::DatabaseConnection;
