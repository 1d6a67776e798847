//! pgdiff: generate on-the-fly migrations between PostgreSQL schemas
//!
//! pgdiff snapshots two schemas, compares them, and emits the DDL that makes
//! the target schema structurally match the source schema.

pub mod config;
pub mod db;
pub mod error;
pub mod schema;
pub mod utils;

use serde::Serialize;
use std::io::{self, BufReader};

// Re-export main types for easier access
pub use config::{Config, DiffOptions};
pub use db::connection::DatabaseConnection;
pub use error::{Error, Result};
pub use schema::analyzer::SchemaAnalyzer;
pub use schema::changeset::{Change, ChangeKind, Changeset};
pub use schema::diff::{diff, SchemaDiff};
pub use schema::generator::MigrationGenerator;
pub use schema::types::SchemaSnapshot;

use schema::defaults::{DefaultResolver, InteractiveDefaults, PresetDefaults};

/// Initialize pgdiff with the specified configuration file
pub async fn init(config_path: &str) -> Result<PgDiffClient> {
    let config = config::load_from_file(config_path)?;
    PgDiffClient::new(config).await
}

/// One emitted statement, for machine-readable output
#[derive(Debug, Clone, Serialize)]
pub struct StatementRecord {
    pub kind: ChangeKind,
    pub object: String,
    pub priority: u32,
    pub sql: String,
}

/// The main client for comparing two schemas
pub struct PgDiffClient {
    config: Config,
    source: SchemaAnalyzer,
    target: SchemaAnalyzer,
}

impl PgDiffClient {
    /// Connect to both sides described by the configuration
    pub async fn new(config: Config) -> Result<Self> {
        let source = DatabaseConnection::connect(&config.source_connection()).await?;
        let target = if config.source.is_none() && config.target.is_none() {
            source.clone()
        } else {
            DatabaseConnection::connect(&config.target_connection()).await?
        };

        Ok(Self {
            config,
            source: SchemaAnalyzer::new(source),
            target: SchemaAnalyzer::new(target),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot both schemas
    pub async fn analyze(&self, source_schema: &str, target_schema: &str) -> Result<(SchemaSnapshot, SchemaSnapshot)> {
        let source = self.source.analyze(source_schema).await?;
        let target = self.target.analyze(target_schema).await?;
        Ok((source, target))
    }

    /// Diff two snapshots using the configured options and defaults
    pub fn generate_changeset(&self, source: &SchemaSnapshot, target: &SchemaSnapshot) -> Result<Changeset> {
        let mut resolver = self.default_resolver()?;
        SchemaDiff::new(&self.config.diff, resolver.as_mut()).generate(source, target)
    }

    /// Render a changeset as one record per statement
    pub fn generate_migrations(
        &self,
        source: &SchemaSnapshot,
        target: &SchemaSnapshot,
        changes: &Changeset,
    ) -> Result<Vec<StatementRecord>> {
        let generator = MigrationGenerator::new(source, target);
        let mut records = Vec::with_capacity(changes.len());
        for change in changes {
            for sql in generator.render(change)? {
                records.push(StatementRecord {
                    kind: change.kind(),
                    object: change.object_name().to_string(),
                    priority: change.priority(),
                    sql,
                });
            }
        }
        Ok(records)
    }

    /// Complete workflow: snapshot both schemas, diff them and render SQL
    pub async fn migration_sql(&self, source_schema: &str, target_schema: &str) -> Result<Vec<StatementRecord>> {
        let (source, target) = self.analyze(source_schema, target_schema).await?;
        let changes = self.generate_changeset(&source, &target)?;

        if changes.is_empty() {
            tracing::info!(source = source_schema, target = target_schema, "Schemas are already in sync");
        }
        self.generate_migrations(&source, &target, &changes)
    }

    fn default_resolver(&self) -> Result<Box<dyn DefaultResolver>> {
        let presets = PresetDefaults::from_config(&self.config.defaults)?;
        if self.config.diff.prompt_for_defaults {
            Ok(Box::new(InteractiveDefaults::new(
                presets,
                BufReader::new(io::stdin()),
                io::stderr(),
            )))
        } else {
            Ok(Box::new(presets))
        }
    }
}
