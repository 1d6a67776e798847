//! Utilities for pgdiff
//!
//! This module provides utility functions used across the library.

pub mod logging;
pub mod naming;

// Re-export key utility functions
pub use logging::init_logging;
pub use naming::{qualified, quote_ident, quote_literal};
