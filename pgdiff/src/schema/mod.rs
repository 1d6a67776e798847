//! Schema module for pgdiff
//!
//! This module handles schema snapshots, comparison, and SQL generation.

pub mod analyzer;
pub mod changeset;
pub mod defaults;
pub mod diff;
pub mod generator;
pub mod types;

// Re-export key types
pub use analyzer::SchemaAnalyzer;
pub use changeset::{Change, ChangeKind, Changeset, ColumnChange};
pub use defaults::{DefaultLiteral, DefaultResolver, InteractiveDefaults, NoDefaults, PresetDefaults};
pub use diff::{diff, SchemaDiff};
pub use generator::MigrationGenerator;
pub use types::{
    ColumnDef, ColumnDims, ColumnProps, ConstraintDef, ConstraintKind, ForeignKeyRef, IndexDef, SchemaSnapshot,
    SequenceDef, TableDef, TypeCatalog,
};
