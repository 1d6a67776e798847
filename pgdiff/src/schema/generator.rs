//! Migration generator
//!
//! This module renders a [`Changeset`] as PostgreSQL statements that apply
//! to the target schema.

use tracing::warn;

use crate::error::{Error, Result};
use crate::schema::changeset::{Change, ColumnChange, Changeset};
use crate::schema::types::{
    ColumnDef, ColumnDims, ConstraintDef, ConstraintKind, IndexDef, SchemaSnapshot, SequenceDef, TableDef,
    TypeCatalog, TypeInfo, PG_CATALOG,
};
use crate::utils::naming::{qualified, qualify_index_definition, quote_ident};

const INDENT: &str = "    ";
/// `data_type` reported for enums, domains and other catalog types
const USER_DEFINED: &str = "USER-DEFINED";

/// Migration SQL generator
///
/// Names are qualified with the target schema. Column types are spelled
/// with the source schema's type catalog, since rendered columns always
/// come from the source side.
pub struct MigrationGenerator<'a> {
    schema: &'a str,
    types: &'a TypeCatalog,
}

impl<'a> MigrationGenerator<'a> {
    /// Create a new migration generator
    pub fn new(source: &'a SchemaSnapshot, target: &'a SchemaSnapshot) -> Self {
        Self {
            schema: &target.name,
            types: &source.types,
        }
    }

    /// One statement per change, in changeset order
    pub fn generate_migration_sql(&self, changes: &Changeset) -> Result<Vec<String>> {
        let mut migrations = Vec::with_capacity(changes.len());
        for change in changes {
            migrations.extend(self.render(change)?);
        }
        Ok(migrations)
    }

    /// Render one change. The result is empty only for an `AlterTable`
    /// without clauses.
    pub fn render(&self, change: &Change) -> Result<Vec<String>> {
        let sql = match change {
            Change::CreateTable { source } => self.generate_create_table_sql(source),
            Change::DropTable { target } => self.generate_drop_table_sql(target),
            Change::AlterTable { target, columns, .. } => {
                return Ok(self.generate_alter_table_sql(target, columns).into_iter().collect())
            }
            Change::CreateSequence { source } => self.generate_create_sequence_sql(source),
            Change::AlterSequence { source, target } => self.generate_alter_sequence_sql(source, target),
            Change::DropSequence { target } => self.generate_drop_sequence_sql(target),
            Change::CreateConstraint { source } => self.generate_create_constraint_sql(source)?,
            Change::DropConstraint { target } => self.generate_drop_constraint_sql(target),
            Change::CreateIndex { source } => self.generate_create_index_sql(source),
            Change::DropIndex { target } => self.generate_drop_index_sql(target),
        };
        Ok(vec![sql])
    }

    /// Clauses of one column change, without the `ALTER TABLE` around them
    pub fn render_column_change(&self, change: &ColumnChange) -> Vec<String> {
        match change {
            ColumnChange::AddColumn { source } => vec![format!("ADD COLUMN {}", self.column_definition(source))],
            ColumnChange::DropColumn { target } => vec![format!("DROP COLUMN {}", quote_ident(&target.name))],
            ColumnChange::AlterColumn { source, target } => self.alter_column_clauses(source, target),
        }
    }

    /// Full SQL type of a column, with length, precision and array suffix
    pub fn column_type(&self, column: &ColumnDef) -> String {
        let mut dims = ColumnDims {
            character_maximum_length: column.props.character_maximum_length,
            numeric_precision: column.props.numeric_precision,
            numeric_scale: column.props.numeric_scale,
            datetime_precision: column.props.datetime_precision,
        };

        let data_type = if column.is_array() {
            let element = match self.types.element_type(&column.props.udt_name) {
                Some(element) => self.type_name(element),
                None => {
                    warn!(
                        table = %column.table_name,
                        column = %column.name,
                        udt_name = %column.props.udt_name,
                        "Unknown array type, guessing element from its name"
                    );
                    TypeCatalog::sql_type_for(column.props.udt_name.trim_start_matches('_'))
                }
            };
            if is_character_type(&element) || element == "numeric" || is_datetime_type(&element) {
                if let Some(element_dims) = self.types.array_dims(&column.table_name, &column.name) {
                    dims = element_dims;
                }
            }
            element
        } else if column.props.data_type == USER_DEFINED {
            match self.types.by_name(&column.props.udt_name) {
                Some(info) => self.type_name(info),
                None => quote_ident(&column.props.udt_name),
            }
        } else {
            column.props.data_type.clone()
        };

        let mut sql_type = data_type.clone();
        if is_character_type(&data_type) {
            if let Some(length) = dims.character_maximum_length {
                sql_type.push_str(&format!("({})", length));
            }
        } else if data_type == "numeric" {
            match (dims.numeric_precision, dims.numeric_scale) {
                (Some(precision), Some(scale)) if scale != 0 => {
                    sql_type.push_str(&format!("({},{})", precision, scale))
                }
                (Some(precision), _) => sql_type.push_str(&format!("({})", precision)),
                _ => {}
            }
        } else if let Some(precision) = dims.datetime_precision {
            if let Some(with_precision) = with_datetime_precision(&data_type, precision) {
                sql_type = with_precision;
            }
        }

        if column.is_array() {
            sql_type.push_str("[]");
        }
        sql_type
    }

    /// How a catalog type is spelled from the target schema
    fn type_name(&self, info: &TypeInfo) -> String {
        if info.namespace == PG_CATALOG {
            info.sql_type.clone()
        } else if self.types.is_local(info) {
            qualified(self.schema, &info.typname)
        } else {
            qualified(&info.namespace, &info.typname)
        }
    }

    /// `name type [DEFAULT x] [NOT NULL]`
    pub fn column_definition(&self, column: &ColumnDef) -> String {
        let mut sql = format!("{} {}", quote_ident(&column.name), self.column_type(column));
        if let Some(default) = &column.props.column_default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if !column.props.is_nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    fn generate_create_table_sql(&self, table: &TableDef) -> String {
        let name = qualified(self.schema, &table.name);
        if table.columns.is_empty() {
            return format!("CREATE TABLE {} ();", name);
        }

        let columns: Vec<String> = table
            .columns
            .values()
            .map(|column| format!("{}{}", INDENT, self.column_definition(column)))
            .collect();
        format!("CREATE TABLE {} (\n{}\n);", name, columns.join(",\n"))
    }

    fn generate_drop_table_sql(&self, table: &TableDef) -> String {
        format!("DROP TABLE {};", qualified(self.schema, &table.name))
    }

    fn generate_alter_table_sql(&self, table: &TableDef, columns: &[ColumnChange]) -> Option<String> {
        let mut ordered: Vec<&ColumnChange> = columns.iter().collect();
        ordered.sort_by_key(|change| change.priority());

        let clauses: Vec<String> = ordered
            .into_iter()
            .flat_map(|change| self.render_column_change(change))
            .map(|clause| format!("{}{}", INDENT, clause))
            .collect();

        if clauses.is_empty() {
            warn!(table = %table.name, "No clauses to alter, skipping statement");
            return None;
        }

        Some(format!(
            "ALTER TABLE {}\n{}\n;",
            qualified(self.schema, &table.name),
            clauses.join(",\n")
        ))
    }

    fn alter_column_clauses(&self, source: &ColumnDef, target: &ColumnDef) -> Vec<String> {
        let name = quote_ident(&target.name);
        let mut clauses = Vec::new();

        if source.type_differs(target) {
            clauses.push(format!("ALTER COLUMN {} TYPE {}", name, self.column_type(source)));
        }

        if source.props.column_default != target.props.column_default {
            match &source.props.column_default {
                Some(default) => clauses.push(format!("ALTER COLUMN {} SET DEFAULT {}", name, default)),
                None => clauses.push(format!("ALTER COLUMN {} DROP DEFAULT", name)),
            }
        }

        if source.props.is_nullable != target.props.is_nullable {
            if source.props.is_nullable {
                clauses.push(format!("ALTER COLUMN {} DROP NOT NULL", name));
            } else {
                clauses.push(format!("ALTER COLUMN {} SET NOT NULL", name));
            }
        }

        clauses
    }

    fn generate_create_sequence_sql(&self, sequence: &SequenceDef) -> String {
        let mut lines = vec![
            format!("START WITH {}", sequence.start_value),
            format!("INCREMENT BY {}", sequence.increment_by),
            min_value_clause(sequence.min_value),
            max_value_clause(sequence.max_value),
            format!("CACHE {}", sequence.cache_value),
        ];
        if sequence.is_cycled {
            lines.push("CYCLE".to_string());
        }

        format!(
            "CREATE SEQUENCE {}\n{}\n;",
            qualified(self.schema, &sequence.name),
            indent_lines(&lines)
        )
    }

    /// Only the differing options; `RESTART` moves past both sides' last value
    fn generate_alter_sequence_sql(&self, source: &SequenceDef, target: &SequenceDef) -> String {
        let mut lines = Vec::new();

        if source.start_value != target.start_value {
            lines.push(format!("START WITH {}", source.start_value));
        }
        if source.last_value != target.last_value {
            let next = source.last_value.max(target.last_value).saturating_add(1);
            lines.push(format!("RESTART {}", next));
        }
        if source.increment_by != target.increment_by {
            lines.push(format!("INCREMENT BY {}", source.increment_by));
        }
        if source.min_value != target.min_value {
            lines.push(min_value_clause(source.min_value));
        }
        if source.max_value != target.max_value {
            lines.push(max_value_clause(source.max_value));
        }
        if source.cache_value != target.cache_value {
            lines.push(format!("CACHE {}", source.cache_value));
        }
        if source.is_cycled != target.is_cycled {
            lines.push(if source.is_cycled { "CYCLE" } else { "NO CYCLE" }.to_string());
        }

        format!(
            "ALTER SEQUENCE {}\n{}\n;",
            qualified(self.schema, &source.name),
            indent_lines(&lines)
        )
    }

    fn generate_drop_sequence_sql(&self, sequence: &SequenceDef) -> String {
        format!("DROP SEQUENCE {};", qualified(self.schema, &sequence.name))
    }

    fn generate_create_constraint_sql(&self, constraint: &ConstraintDef) -> Result<String> {
        let body = match &constraint.kind {
            ConstraintKind::PrimaryKey { columns } | ConstraintKind::Unique { columns } => format!(
                "{} ({})",
                constraint.constraint_type(),
                join_idents(columns.iter())
            ),
            ConstraintKind::ForeignKey(fk) => {
                let mut sql = format!(
                    "FOREIGN KEY ({}) REFERENCES {}({})",
                    join_idents(fk.columns.iter()),
                    qualified(self.schema, &fk.ref_table),
                    join_idents(fk.ref_columns.iter())
                );
                if fk.on_update != "NO ACTION" {
                    sql.push_str(&format!(" ON UPDATE {}", fk.on_update));
                }
                if fk.on_delete != "NO ACTION" {
                    sql.push_str(&format!(" ON DELETE {}", fk.on_delete));
                }
                sql
            }
            ConstraintKind::Check { clause } => format!("CHECK {}", clause),
            ConstraintKind::Other { constraint_type } => {
                return Err(Error::MigrationError(format!(
                    "Cannot create constraint {} of type {}",
                    constraint.name, constraint_type
                )))
            }
        };

        let mut deferral = String::new();
        if !matches!(constraint.kind, ConstraintKind::Check { .. }) {
            if constraint.is_deferrable {
                deferral.push_str(" DEFERRABLE");
            }
            if constraint.initially_deferred {
                deferral.push_str(" INITIALLY DEFERRED");
            }
        }

        Ok(format!(
            "ALTER TABLE {}\n{}ADD CONSTRAINT {} {}{};",
            qualified(self.schema, &constraint.table_name),
            INDENT,
            quote_ident(&constraint.name),
            body,
            deferral
        ))
    }

    fn generate_drop_constraint_sql(&self, constraint: &ConstraintDef) -> String {
        format!(
            "ALTER TABLE {}\n{}DROP CONSTRAINT {};",
            qualified(self.schema, &constraint.table_name),
            INDENT,
            quote_ident(&constraint.name)
        )
    }

    fn generate_create_index_sql(&self, index: &IndexDef) -> String {
        format!("{};", qualify_index_definition(&index.definition, self.schema))
    }

    fn generate_drop_index_sql(&self, index: &IndexDef) -> String {
        format!("DROP INDEX {};", qualified(self.schema, &index.name))
    }
}

fn is_datetime_type(data_type: &str) -> bool {
    with_datetime_precision(data_type, 0).is_some()
}

/// `timestamp(3) with time zone` and friends; `None` for types without fractional seconds
fn with_datetime_precision(data_type: &str, precision: i32) -> Option<String> {
    for base in ["timestamp", "time"] {
        if let Some(zone) = data_type.strip_prefix(base) {
            if zone.is_empty() || zone == " with time zone" || zone == " without time zone" {
                return Some(format!("{}({}){}", base, precision, zone));
            }
        }
    }
    match data_type {
        "timestamptz" | "timetz" | "interval" => Some(format!("{}({})", data_type, precision)),
        _ => None,
    }
}

fn is_character_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "character" | "char" | "bpchar" | "character varying" | "varchar"
    )
}

fn min_value_clause(min_value: Option<i64>) -> String {
    match min_value {
        Some(value) => format!("MINVALUE {}", value),
        None => "NO MINVALUE".to_string(),
    }
}

fn max_value_clause(max_value: Option<i64>) -> String {
    match max_value {
        Some(value) => format!("MAXVALUE {}", value),
        None => "NO MAXVALUE".to_string(),
    }
}

fn indent_lines(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| format!("{}{}", INDENT, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_idents<'s>(names: impl Iterator<Item = &'s String>) -> String {
    names.map(|name| quote_ident(name)).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::ForeignKeyRef;
    use pretty_assertions::assert_eq;

    fn snapshots() -> (SchemaSnapshot, SchemaSnapshot) {
        let mut source = SchemaSnapshot::new("s1");
        source.types.add_type(23, "int4", 0);
        source.types.add_type(1007, "_int4", 23);
        source.types.add_type(1042, "bpchar", 0);
        source.types.add_type(1014, "_bpchar", 1042);
        source.types.add_type(1700, "numeric", 0);
        source.types.add_type(1231, "_numeric", 1700);
        (source, SchemaSnapshot::new("s2"))
    }

    fn render_one(change: Change) -> String {
        let (source, target) = snapshots();
        let generator = MigrationGenerator::new(&source, &target);
        generator.render(&change).unwrap().join("\n")
    }

    #[test]
    fn create_table() {
        let table = TableDef::new("foo")
            .column(ColumnDef::new("bar", "integer").udt("int4").nullable(false).default("7"))
            .column(ColumnDef::new("baz", "character varying").udt("varchar").length(3));
        assert_eq!(
            render_one(Change::CreateTable { source: table }),
            "CREATE TABLE s2.foo (\n    bar integer DEFAULT 7 NOT NULL,\n    baz character varying(3)\n);"
        );
    }

    #[test]
    fn array_types_use_element_dims() {
        let (mut source, target) = snapshots();
        source.types.set_array_dims(
            "foo",
            "chars",
            ColumnDims {
                character_maximum_length: Some(1),
                ..ColumnDims::default()
            },
        );
        source.types.set_array_dims(
            "foo",
            "amounts",
            ColumnDims {
                numeric_precision: Some(10),
                numeric_scale: Some(2),
                ..ColumnDims::default()
            },
        );
        let table = TableDef::new("foo")
            .column(ColumnDef::new("ints", "ARRAY").udt("_int4"))
            .column(ColumnDef::new("chars", "ARRAY").udt("_bpchar"))
            .column(ColumnDef::new("amounts", "ARRAY").udt("_numeric"));

        let generator = MigrationGenerator::new(&source, &target);
        let types: Vec<String> = table.columns.values().map(|c| generator.column_type(c)).collect();
        assert_eq!(types, vec!["integer[]", "character(1)[]", "numeric(10,2)[]"]);
    }

    #[test]
    fn numeric_without_scale() {
        let (source, target) = snapshots();
        let generator = MigrationGenerator::new(&source, &target);
        let column = ColumnDef::new("n", "numeric").precision(5, Some(0));
        assert_eq!(generator.column_type(&column), "numeric(5)");
        let column = ColumnDef::new("n", "numeric");
        assert_eq!(generator.column_type(&column), "numeric");
    }

    #[test]
    fn alter_table_orders_clauses() {
        let source = TableDef::new("foo")
            .column(ColumnDef::new("a", "integer").nullable(false).default("7"))
            .column(ColumnDef::new("c", "text"));
        let target = TableDef::new("foo")
            .column(ColumnDef::new("a", "text"))
            .column(ColumnDef::new("b", "text"));
        let columns = vec![
            ColumnChange::AlterColumn {
                source: source.columns["a"].clone(),
                target: target.columns["a"].clone(),
            },
            ColumnChange::AddColumn {
                source: source.columns["c"].clone(),
            },
            ColumnChange::DropColumn {
                target: target.columns["b"].clone(),
            },
        ];
        assert_eq!(
            render_one(Change::AlterTable { source, target, columns }),
            "ALTER TABLE s2.foo\n    DROP COLUMN b,\n    ADD COLUMN c text,\n    ALTER COLUMN a TYPE integer,\n    ALTER COLUMN a SET DEFAULT 7,\n    ALTER COLUMN a SET NOT NULL\n;"
        );
    }

    #[test]
    fn alter_fractional_seconds_precision() {
        let source = ColumnDef::new("ts", "timestamp without time zone").datetime_precision(3);
        let target = ColumnDef::new("ts", "timestamp without time zone").datetime_precision(6);
        let change = Change::AlterTable {
            source: TableDef::new("foo").column(source.clone()),
            target: TableDef::new("foo").column(target.clone()),
            columns: vec![ColumnChange::AlterColumn { source, target }],
        };
        assert_eq!(
            render_one(change),
            "ALTER TABLE s2.foo\n    ALTER COLUMN ts TYPE timestamp(3) without time zone\n;"
        );
    }

    #[test]
    fn datetime_types_keep_precision() {
        let (mut source, target) = snapshots();
        source.types.add_type(1184, "timestamptz", 0);
        source.types.add_type(1185, "_timestamptz", 1184);
        source.types.set_array_dims(
            "foo",
            "stamps",
            ColumnDims {
                datetime_precision: Some(0),
                ..ColumnDims::default()
            },
        );
        let table = TableDef::new("foo")
            .column(ColumnDef::new("at", "timestamp with time zone").datetime_precision(3))
            .column(ColumnDef::new("t", "time without time zone").datetime_precision(6))
            .column(ColumnDef::new("span", "interval").datetime_precision(2))
            .column(ColumnDef::new("day", "date").datetime_precision(0))
            .column(ColumnDef::new("stamps", "ARRAY").udt("_timestamptz"));

        let generator = MigrationGenerator::new(&source, &target);
        let types: Vec<String> = table.columns.values().map(|c| generator.column_type(c)).collect();
        assert_eq!(
            types,
            vec![
                "timestamp(3) with time zone",
                "time(6) without time zone",
                "interval(2)",
                "date",
                "timestamptz(0)[]",
            ]
        );
    }

    #[test]
    fn user_defined_types_resolve_through_the_catalog() {
        let (mut source, target) = snapshots();
        source.types.add_type_in("s1", 16400, "mood", 0);
        source.types.add_type_in("s1", 16399, "_mood", 16400);
        source.types.add_type_in("public", 16500, "citext", 0);
        let table = TableDef::new("foo")
            .column(ColumnDef::new("mood", "USER-DEFINED").udt("mood"))
            .column(ColumnDef::new("moods", "ARRAY").udt("_mood"))
            .column(ColumnDef::new("email", "USER-DEFINED").udt("citext"))
            .column(ColumnDef::new("shape", "USER-DEFINED").udt("geometry"));

        let generator = MigrationGenerator::new(&source, &target);
        let types: Vec<String> = table.columns.values().map(|c| generator.column_type(c)).collect();
        assert_eq!(types, vec!["s2.mood", "s2.mood[]", "public.citext", "geometry"]);
    }

    #[test]
    fn sequences() {
        assert_eq!(
            render_one(Change::CreateSequence {
                source: SequenceDef::new("foo")
            }),
            "CREATE SEQUENCE s2.foo\n    START WITH 1\n    INCREMENT BY 1\n    NO MINVALUE\n    NO MAXVALUE\n    CACHE 1\n;"
        );

        let mut source = SequenceDef::new("foo").last_value(10);
        source.is_cycled = true;
        source.max_value = Some(100);
        assert_eq!(
            render_one(Change::AlterSequence {
                source,
                target: SequenceDef::new("foo").last_value(3),
            }),
            "ALTER SEQUENCE s2.foo\n    RESTART 11\n    MAXVALUE 100\n    CYCLE\n;"
        );

        assert_eq!(
            render_one(Change::DropSequence {
                target: SequenceDef::new("foo")
            }),
            "DROP SEQUENCE s2.foo;"
        );
    }

    #[test]
    fn constraints() {
        assert_eq!(
            render_one(Change::CreateConstraint {
                source: ConstraintDef::primary_key("foo_pkey", "foo", &["b", "a"]),
            }),
            "ALTER TABLE s2.foo\n    ADD CONSTRAINT foo_pkey PRIMARY KEY (a, b);"
        );

        let fk = ConstraintDef::new(
            "fk",
            "source",
            ConstraintKind::ForeignKey(ForeignKeyRef::new(&["fk"], "target", &["pk"])),
        )
        .deferrable(true, true);
        assert_eq!(
            render_one(Change::CreateConstraint { source: fk }),
            "ALTER TABLE s2.source\n    ADD CONSTRAINT fk FOREIGN KEY (fk) REFERENCES s2.target(pk) DEFERRABLE INITIALLY DEFERRED;"
        );

        let mut cascading = ForeignKeyRef::new(&["fk"], "target", &["pk"]);
        cascading.on_delete = "CASCADE".to_string();
        assert_eq!(
            render_one(Change::CreateConstraint {
                source: ConstraintDef::new("fk", "source", ConstraintKind::ForeignKey(cascading)),
            }),
            "ALTER TABLE s2.source\n    ADD CONSTRAINT fk FOREIGN KEY (fk) REFERENCES s2.target(pk) ON DELETE CASCADE;"
        );

        assert_eq!(
            render_one(Change::CreateConstraint {
                source: ConstraintDef::check("c", "foo", "((bar >= 0))"),
            }),
            "ALTER TABLE s2.foo\n    ADD CONSTRAINT c CHECK ((bar >= 0));"
        );

        assert_eq!(
            render_one(Change::DropConstraint {
                target: ConstraintDef::check("c", "foo", "((bar >= 0))"),
            }),
            "ALTER TABLE s2.foo\n    DROP CONSTRAINT c;"
        );
    }

    #[test]
    fn other_constraints_cannot_be_created() {
        let (source, target) = snapshots();
        let generator = MigrationGenerator::new(&source, &target);
        let change = Change::CreateConstraint {
            source: ConstraintDef::new(
                "ex",
                "foo",
                ConstraintKind::Other {
                    constraint_type: "EXCLUDE".to_string(),
                },
            ),
        };
        assert!(matches!(generator.render(&change), Err(Error::MigrationError(_))));
    }

    #[test]
    fn indexes() {
        let index = IndexDef::new("test_index", "foo", "CREATE INDEX test_index ON s1.foo USING btree (baz)");
        assert_eq!(
            render_one(Change::CreateIndex { source: index.clone() }),
            "CREATE INDEX test_index ON s2.foo USING btree (baz);"
        );
        assert_eq!(render_one(Change::DropIndex { target: index }), "DROP INDEX s2.test_index;");
    }

    #[test]
    fn reserved_names_are_quoted() {
        let table = TableDef::new("order").column(ColumnDef::new("select", "integer"));
        assert_eq!(
            render_one(Change::CreateTable { source: table }),
            "CREATE TABLE s2.\"order\" (\n    \"select\" integer\n);"
        );
    }
}
