//! Database schema analyzer
//!
//! This module reads one schema's catalog state into a [`SchemaSnapshot`].

use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

use crate::db::connection::DatabaseConnection;
use crate::error::{Error, Result};
use crate::schema::types::{
    ColumnDef, ColumnDims, ColumnProps, ConstraintDef, ConstraintKind, ForeignKeyRef, IndexDef, SchemaSnapshot,
    SequenceDef, TableDef, TypeCatalog,
};

/// Schema analyzer trait
#[async_trait]
pub trait Analyzer {
    /// Read everything the differ compares
    async fn analyze_schema(&self, schema_name: &str) -> Result<SchemaSnapshot>;

    /// Base tables and their columns
    async fn analyze_tables(&self, schema_name: &str) -> Result<IndexMap<String, TableDef>>;

    async fn analyze_sequences(&self, schema_name: &str) -> Result<Vec<SequenceDef>>;

    /// Primary key, unique, foreign key and check constraints
    async fn analyze_constraints(&self, schema_name: &str) -> Result<Vec<ConstraintDef>>;

    /// Indexes not backing a primary key or unique constraint
    async fn analyze_indexes(&self, schema_name: &str) -> Result<Vec<IndexDef>>;

    /// Type catalog, plus element dimensions of the given tables' array columns
    async fn analyze_types(&self, schema_name: &str, tables: &IndexMap<String, TableDef>) -> Result<TypeCatalog>;
}

/// Schema analyzer for database schema introspection
pub struct SchemaAnalyzer {
    connection: DatabaseConnection,
}

impl SchemaAnalyzer {
    /// Create a new schema analyzer
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Snapshot the named schema
    pub async fn analyze(&self, schema_name: &str) -> Result<SchemaSnapshot> {
        PostgresAnalyzer {
            pool: self.connection.pool(),
        }
        .analyze_schema(schema_name)
        .await
    }
}

// Row types for PostgreSQL queries. Information schema domains are cast to
// plain types so they decode.
#[derive(FromRow)]
struct TableRow {
    table_name: String,
}

#[derive(FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: String,
    data_type: String,
    udt_name: String,
    character_maximum_length: Option<i32>,
    numeric_precision: Option<i32>,
    numeric_scale: Option<i32>,
    datetime_precision: Option<i32>,
    column_default: Option<String>,
    is_nullable: bool,
}

#[derive(FromRow)]
struct SequenceRow {
    sequence_name: String,
    start_value: i64,
    increment_by: i64,
    min_value: i64,
    max_value: i64,
    cache_value: i64,
    is_cycled: bool,
    last_value: Option<i64>,
}

#[derive(FromRow)]
struct KeyConstraintRow {
    constraint_name: String,
    table_name: String,
    constraint_type: String,
    is_deferrable: bool,
    initially_deferred: bool,
    column_name: String,
}

#[derive(FromRow)]
struct ForeignKeyRow {
    constraint_name: String,
    table_name: String,
    is_deferrable: bool,
    initially_deferred: bool,
    column_name: String,
    ref_table: String,
    ref_column: String,
    update_rule: String,
    delete_rule: String,
}

#[derive(FromRow)]
struct CheckRow {
    constraint_name: String,
    table_name: String,
    check_clause: String,
    is_deferrable: bool,
    initially_deferred: bool,
}

#[derive(FromRow)]
struct OtherConstraintRow {
    constraint_name: String,
    table_name: String,
    constraint_type: String,
}

#[derive(FromRow)]
struct IndexRow {
    index_name: String,
    table_name: String,
    index_definition: String,
}

#[derive(FromRow)]
struct TypeRow {
    oid: i64,
    namespace: String,
    typname: String,
    typelem: i64,
}

#[derive(FromRow)]
struct ArrayDimsRow {
    character_maximum_length: Option<i32>,
    numeric_precision: Option<i32>,
    numeric_scale: Option<i32>,
    datetime_precision: Option<i32>,
}

/// PostgreSQL schema analyzer
struct PostgresAnalyzer<'a> {
    pool: &'a PgPool,
}

impl<'a> PostgresAnalyzer<'a> {
    async fn ensure_schema_exists(&self, schema_name: &str) -> Result<()> {
        let sql = "SELECT nspname::text AS table_name FROM pg_namespace WHERE nspname = $1";
        let found = sqlx::query_as::<_, TableRow>(sql)
            .bind(schema_name)
            .fetch_optional(self.pool)
            .await?;

        match found {
            Some(_) => Ok(()),
            None => Err(Error::SchemaAnalysisError(format!(
                "Schema {} does not exist",
                schema_name
            ))),
        }
    }
}

#[async_trait]
impl<'a> Analyzer for PostgresAnalyzer<'a> {
    async fn analyze_schema(&self, schema_name: &str) -> Result<SchemaSnapshot> {
        self.ensure_schema_exists(schema_name).await?;
        let mut snapshot = SchemaSnapshot::new(schema_name);

        snapshot.tables = self.analyze_tables(schema_name).await?;
        for sequence in self.analyze_sequences(schema_name).await? {
            snapshot.add_sequence(sequence);
        }
        for constraint in self.analyze_constraints(schema_name).await? {
            snapshot.add_constraint(constraint);
        }
        for index in self.analyze_indexes(schema_name).await? {
            snapshot.add_index(index);
        }
        snapshot.types = self.analyze_types(schema_name, &snapshot.tables).await?;

        info!(
            schema = schema_name,
            tables = snapshot.tables.len(),
            sequences = snapshot.sequences.len(),
            constraints = snapshot.constraints.len(),
            indexes = snapshot.indexes.len(),
            "Analyzed schema"
        );
        Ok(snapshot)
    }

    async fn analyze_tables(&self, schema_name: &str) -> Result<IndexMap<String, TableDef>> {
        let sql = r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = $1
                AND table_type = 'BASE TABLE'
                AND table_name::text !~ '^pgsql_'
            ORDER BY table_name
        "#;

        let table_rows = sqlx::query_as::<_, TableRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        let mut tables: IndexMap<String, TableDef> = table_rows
            .into_iter()
            .map(|row| (row.table_name.clone(), TableDef::new(&row.table_name)))
            .collect();

        let sql = r#"
            SELECT
                table_name::text AS table_name,
                column_name::text AS column_name,
                data_type::text AS data_type,
                udt_name::text AS udt_name,
                character_maximum_length::int4 AS character_maximum_length,
                numeric_precision::int4 AS numeric_precision,
                numeric_scale::int4 AS numeric_scale,
                datetime_precision::int4 AS datetime_precision,
                column_default::text AS column_default,
                (is_nullable::text = 'YES') AS is_nullable
            FROM information_schema.columns
            WHERE table_schema = $1
            ORDER BY table_name, ordinal_position
        "#;

        let column_rows = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        for col in column_rows {
            // views and filtered tables also show up here
            let Some(table) = tables.get_mut(&col.table_name) else {
                continue;
            };
            table.add_column(ColumnDef {
                table_name: col.table_name,
                name: col.column_name,
                props: ColumnProps {
                    data_type: col.data_type,
                    udt_name: col.udt_name,
                    character_maximum_length: col.character_maximum_length,
                    numeric_precision: col.numeric_precision,
                    numeric_scale: col.numeric_scale,
                    datetime_precision: col.datetime_precision,
                    column_default: col.column_default,
                    is_nullable: col.is_nullable,
                },
            });
        }

        debug!(schema = schema_name, tables = tables.len(), "Read tables");
        Ok(tables)
    }

    async fn analyze_sequences(&self, schema_name: &str) -> Result<Vec<SequenceDef>> {
        let sql = r#"
            SELECT
                sequencename::text AS sequence_name,
                start_value,
                increment_by,
                min_value,
                max_value,
                cache_size AS cache_value,
                cycle AS is_cycled,
                last_value
            FROM pg_sequences
            WHERE schemaname = $1
            ORDER BY sequencename
        "#;

        let rows = sqlx::query_as::<_, SequenceRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(sequence_from_row).collect())
    }

    async fn analyze_constraints(&self, schema_name: &str) -> Result<Vec<ConstraintDef>> {
        let mut constraints = Vec::new();

        let sql = r#"
            SELECT
                tc.constraint_name::text AS constraint_name,
                tc.table_name::text AS table_name,
                tc.constraint_type::text AS constraint_type,
                (tc.is_deferrable::text = 'YES') AS is_deferrable,
                (tc.initially_deferred::text = 'YES') AS initially_deferred,
                kcu.column_name::text AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON kcu.constraint_schema = tc.constraint_schema
                AND kcu.constraint_name = tc.constraint_name
                AND kcu.table_name = tc.table_name
            WHERE tc.constraint_schema = $1
                AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
            ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position
        "#;

        let key_rows = sqlx::query_as::<_, KeyConstraintRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        let mut keys: IndexMap<(String, String), ConstraintDef> = IndexMap::new();
        for row in key_rows {
            let constraint = keys
                .entry((row.table_name.clone(), row.constraint_name.clone()))
                .or_insert_with(|| {
                    let kind = if row.constraint_type == "PRIMARY KEY" {
                        ConstraintKind::PrimaryKey { columns: Default::default() }
                    } else {
                        ConstraintKind::Unique { columns: Default::default() }
                    };
                    ConstraintDef::new(&row.constraint_name, &row.table_name, kind)
                        .deferrable(row.is_deferrable, row.initially_deferred)
                });
            if let ConstraintKind::PrimaryKey { columns } | ConstraintKind::Unique { columns } = &mut constraint.kind {
                columns.insert(row.column_name);
            }
        }
        constraints.extend(keys.into_values());

        let sql = r#"
            SELECT
                tc.constraint_name::text AS constraint_name,
                tc.table_name::text AS table_name,
                (tc.is_deferrable::text = 'YES') AS is_deferrable,
                (tc.initially_deferred::text = 'YES') AS initially_deferred,
                kcu.column_name::text AS column_name,
                ref.table_name::text AS ref_table,
                ref.column_name::text AS ref_column,
                rc.update_rule::text AS update_rule,
                rc.delete_rule::text AS delete_rule
            FROM information_schema.table_constraints tc
            JOIN information_schema.referential_constraints rc
                ON rc.constraint_schema = tc.constraint_schema
                AND rc.constraint_name = tc.constraint_name
            JOIN information_schema.key_column_usage kcu
                ON kcu.constraint_schema = tc.constraint_schema
                AND kcu.constraint_name = tc.constraint_name
                AND kcu.table_name = tc.table_name
            JOIN information_schema.key_column_usage ref
                ON ref.constraint_schema = rc.unique_constraint_schema
                AND ref.constraint_name = rc.unique_constraint_name
                AND ref.ordinal_position = kcu.position_in_unique_constraint
            WHERE tc.constraint_schema = $1
                AND tc.constraint_type = 'FOREIGN KEY'
            ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position
        "#;

        let fk_rows = sqlx::query_as::<_, ForeignKeyRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        let mut foreign_keys: IndexMap<(String, String), ConstraintDef> = IndexMap::new();
        for row in fk_rows {
            let constraint = foreign_keys
                .entry((row.table_name.clone(), row.constraint_name.clone()))
                .or_insert_with(|| {
                    let fk = ForeignKeyRef {
                        columns: Vec::new(),
                        ref_table: row.ref_table.clone(),
                        ref_columns: Vec::new(),
                        on_update: row.update_rule.clone(),
                        on_delete: row.delete_rule.clone(),
                    };
                    ConstraintDef::new(&row.constraint_name, &row.table_name, ConstraintKind::ForeignKey(fk))
                        .deferrable(row.is_deferrable, row.initially_deferred)
                });
            if let ConstraintKind::ForeignKey(fk) = &mut constraint.kind {
                fk.columns.push(row.column_name);
                fk.ref_columns.push(row.ref_column);
            }
        }
        constraints.extend(foreign_keys.into_values());

        let sql = r#"
            SELECT
                tc.constraint_name::text AS constraint_name,
                tc.table_name::text AS table_name,
                cc.check_clause::text AS check_clause,
                (tc.is_deferrable::text = 'YES') AS is_deferrable,
                (tc.initially_deferred::text = 'YES') AS initially_deferred
            FROM information_schema.table_constraints tc
            JOIN information_schema.check_constraints cc
                ON cc.constraint_schema = tc.constraint_schema
                AND cc.constraint_name = tc.constraint_name
            WHERE tc.constraint_schema = $1
                AND tc.constraint_type = 'CHECK'
                AND tc.constraint_name::text !~ '_not_null$'
            ORDER BY tc.table_name, tc.constraint_name
        "#;

        let check_rows = sqlx::query_as::<_, CheckRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        constraints.extend(check_rows.into_iter().map(|row| {
            ConstraintDef::check(&row.constraint_name, &row.table_name, &row.check_clause)
                .deferrable(row.is_deferrable, row.initially_deferred)
        }));

        let sql = r#"
            SELECT
                constraint_name::text AS constraint_name,
                table_name::text AS table_name,
                constraint_type::text AS constraint_type
            FROM information_schema.table_constraints
            WHERE constraint_schema = $1
                AND constraint_type::text NOT IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY', 'CHECK')
            ORDER BY table_name, constraint_name
        "#;

        let other_rows = sqlx::query_as::<_, OtherConstraintRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        constraints.extend(other_rows.into_iter().map(|row| {
            ConstraintDef::new(
                &row.constraint_name,
                &row.table_name,
                ConstraintKind::Other {
                    constraint_type: row.constraint_type,
                },
            )
        }));

        debug!(schema = schema_name, constraints = constraints.len(), "Read constraints");
        Ok(constraints)
    }

    async fn analyze_indexes(&self, schema_name: &str) -> Result<Vec<IndexDef>> {
        let sql = r#"
            SELECT
                indexname::text AS index_name,
                tablename::text AS table_name,
                indexdef AS index_definition
            FROM pg_indexes
            WHERE schemaname = $1
                AND indexname::text !~ '(_pkey|_key)$'
                AND indexdef !~ '^CREATE UNIQUE'
            ORDER BY indexname
        "#;

        let rows = sqlx::query_as::<_, IndexRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| IndexDef::new(&row.index_name, &row.table_name, &row.index_definition))
            .collect())
    }

    async fn analyze_types(&self, schema_name: &str, tables: &IndexMap<String, TableDef>) -> Result<TypeCatalog> {
        let sql = r#"
            SELECT
                t.oid::int8 AS oid,
                n.nspname::text AS namespace,
                t.typname::text AS typname,
                t.typelem::int8 AS typelem
            FROM pg_type t
            JOIN pg_namespace n ON n.oid = t.typnamespace
            WHERE n.nspname IN ('pg_catalog', $1)
        "#;

        let rows = sqlx::query_as::<_, TypeRow>(sql)
            .bind(schema_name)
            .fetch_all(self.pool)
            .await?;

        let mut types = TypeCatalog::for_schema(schema_name);
        for row in rows {
            types.add_type_in(&row.namespace, to_oid(row.oid)?, &row.typname, to_oid(row.typelem)?);
        }

        let sql = r#"
            SELECT
                information_schema._pg_char_max_length(t.typelem, a.atttypmod)::int4 AS character_maximum_length,
                information_schema._pg_numeric_precision(t.typelem, a.atttypmod)::int4 AS numeric_precision,
                information_schema._pg_numeric_scale(t.typelem, a.atttypmod)::int4 AS numeric_scale,
                information_schema._pg_datetime_precision(t.typelem, a.atttypmod)::int4 AS datetime_precision
            FROM pg_attribute a
            JOIN pg_type t ON t.oid = a.atttypid
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2 AND a.attname = $3
        "#;

        for table in tables.values() {
            for column in table.columns.values().filter(|column| column.is_array()) {
                let row = sqlx::query_as::<_, ArrayDimsRow>(sql)
                    .bind(schema_name)
                    .bind(&table.name)
                    .bind(&column.name)
                    .fetch_optional(self.pool)
                    .await?;

                if let Some(row) = row {
                    types.set_array_dims(
                        &table.name,
                        &column.name,
                        ColumnDims {
                            character_maximum_length: row.character_maximum_length,
                            numeric_precision: row.numeric_precision,
                            numeric_scale: row.numeric_scale,
                            datetime_precision: row.datetime_precision,
                        },
                    );
                }
            }
        }

        Ok(types)
    }
}

fn to_oid(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::SchemaAnalysisError(format!("Invalid type oid {}", value)))
}

/// Bounds equal to the implicit ones for the sequence's direction become
/// `None`; a sequence never read from reports its start value
fn sequence_from_row(row: SequenceRow) -> SequenceDef {
    let (implicit_min, implicit_max) = if row.increment_by > 0 {
        (1, i64::MAX)
    } else {
        (i64::MIN, -1)
    };

    SequenceDef {
        name: row.sequence_name,
        start_value: row.start_value,
        increment_by: row.increment_by,
        min_value: Some(row.min_value).filter(|&min| min != implicit_min),
        max_value: Some(row.max_value).filter(|&max| max != implicit_max),
        cache_value: row.cache_value,
        is_cycled: row.is_cycled,
        last_value: row.last_value.unwrap_or(row.start_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(increment_by: i64, min_value: i64, max_value: i64, last_value: Option<i64>) -> SequenceRow {
        SequenceRow {
            sequence_name: "foo".to_string(),
            start_value: 1,
            increment_by,
            min_value,
            max_value,
            cache_value: 1,
            is_cycled: false,
            last_value,
        }
    }

    #[test]
    fn implicit_bounds_become_none() {
        let ascending = sequence_from_row(row(1, 1, i64::MAX, Some(4)));
        assert_eq!(ascending, SequenceDef::new("foo").last_value(4));

        let descending = sequence_from_row(row(-1, i64::MIN, -1, Some(4)));
        assert_eq!((descending.min_value, descending.max_value), (None, None));
    }

    #[test]
    fn explicit_bounds_are_kept() {
        let sequence = sequence_from_row(row(1, 5, 2147483647, None));
        assert_eq!(sequence.min_value, Some(5));
        assert_eq!(sequence.max_value, Some(2147483647));
        assert_eq!(sequence.last_value, 1);
    }

    #[test]
    fn oid_conversion() {
        assert_eq!(to_oid(1007).unwrap(), 1007);
        assert!(to_oid(-1).is_err());
    }
}
