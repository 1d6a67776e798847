//! Schema difference calculator
//!
//! This module compares two schema snapshots and produces the ordered
//! [`Changeset`] that turns the target into the source.

use tracing::{debug, warn};

use crate::config::DiffOptions;
use crate::error::Result;
use crate::schema::changeset::{Change, ChangeKind, ColumnChange, Changeset};
use crate::schema::defaults::{DefaultResolver, NoDefaults};
use crate::schema::types::{union_keys, ColumnDef, SchemaSnapshot, TableDef};

/// Compare `source` against `target` without supplying any defaults
pub fn diff(source: &SchemaSnapshot, target: &SchemaSnapshot, options: &DiffOptions) -> Result<Changeset> {
    SchemaDiff::new(options, &mut NoDefaults).generate(source, target)
}

/// Calculates the changes needed to synchronize two snapshots
///
/// `source` is the schema being copied from and `target` the one being
/// migrated; the resulting statements apply to `target`.
pub struct SchemaDiff<'a> {
    options: &'a DiffOptions,
    resolver: &'a mut dyn DefaultResolver,
}

impl<'a> SchemaDiff<'a> {
    pub fn new(options: &'a DiffOptions, resolver: &'a mut dyn DefaultResolver) -> Self {
        Self { options, resolver }
    }

    /// Generate the sorted changeset between two snapshots
    pub fn generate(&mut self, source: &SchemaSnapshot, target: &SchemaSnapshot) -> Result<Changeset> {
        let changes = self
            .diff_sequences(source, target)
            .merge(self.diff_tables(source, target)?)
            .merge(self.diff_constraints(source, target)?)
            .merge(self.diff_indexes(source, target))
            .sorted();

        debug!(
            source = %source.name,
            target = %target.name,
            changes = changes.len(),
            "Schema diff complete"
        );
        Ok(changes)
    }

    /// Sequences are matched by name; see [`crate::schema::types::SequenceDef::satisfied_by`]
    pub fn diff_sequences(&self, source: &SchemaSnapshot, target: &SchemaSnapshot) -> Changeset {
        let mut changes = Changeset::new();

        for name in union_keys(&source.sequences, &target.sequences) {
            match (source.sequences.get(name), target.sequences.get(name)) {
                (Some(s), None) => changes.push(Change::CreateSequence { source: s.clone() }),
                (None, Some(t)) => changes.push(Change::DropSequence { target: t.clone() }),
                (Some(s), Some(t)) if s.satisfied_by(t) => {}
                (Some(s), Some(t)) => {
                    if self.options.no_alter_sequences {
                        debug!(sequence = name, "Skipping sequence alteration");
                    } else {
                        changes.push(Change::AlterSequence {
                            source: s.clone(),
                            target: t.clone(),
                        });
                    }
                }
                // keys only come from the two maps
                (None, None) => {}
            }
        }

        log_changes("sequences", &changes);
        changes
    }

    /// Tables are matched by name; tables present on both sides with
    /// differing columns become one `AlterTable` each
    pub fn diff_tables(&mut self, source: &SchemaSnapshot, target: &SchemaSnapshot) -> Result<Changeset> {
        let mut changes = Changeset::new();

        for name in union_keys(&source.tables, &target.tables) {
            match (source.tables.get(name), target.tables.get(name)) {
                (Some(s), None) => changes.push(Change::CreateTable { source: s.clone() }),
                (None, Some(t)) => changes.push(Change::DropTable { target: t.clone() }),
                (Some(s), Some(t)) if s == t => {}
                (Some(s), Some(t)) => {
                    let columns = self.diff_columns(s, t)?;
                    debug_assert!(!columns.is_empty(), "unequal tables without column changes");
                    if columns.is_empty() {
                        warn!(table = name, "Tables differ but no column changes were found");
                        continue;
                    }
                    changes.push(Change::AlterTable {
                        source: s.clone(),
                        target: t.clone(),
                        columns,
                    });
                }
                (None, None) => {}
            }
        }

        log_changes("tables", &changes);
        Ok(changes)
    }

    /// Column-level changes of one table, sorted by clause priority
    pub fn diff_columns(&mut self, source: &TableDef, target: &TableDef) -> Result<Vec<ColumnChange>> {
        let mut changes = Vec::new();

        for name in source.column_names_with(target) {
            match (source.columns.get(name), target.columns.get(name)) {
                (Some(s), None) => {
                    let mut column = s.clone();
                    if column.props.column_default.is_none() && !column.props.is_nullable {
                        self.synthesize_default(&source.name, &mut column)?;
                    }
                    changes.push(ColumnChange::AddColumn { source: column });
                }
                (None, Some(t)) => changes.push(ColumnChange::DropColumn { target: t.clone() }),
                (Some(s), Some(t)) if s == t => {}
                (Some(s), Some(t)) => {
                    let mut column = s.clone();
                    let becomes_not_null = t.props.is_nullable && !s.props.is_nullable;
                    if becomes_not_null && s.props.column_default.is_none() && t.props.column_default.is_none() {
                        self.synthesize_default(&source.name, &mut column)?;
                    }
                    changes.push(ColumnChange::AlterColumn {
                        source: column,
                        target: t.clone(),
                    });
                }
                (None, None) => {}
            }
        }

        changes.sort_by_key(ColumnChange::priority);
        Ok(changes)
    }

    /// Constraints are matched by comparison key, which is the name unless
    /// `normalize_constraints` is set. Changed constraints are dropped and
    /// recreated.
    pub fn diff_constraints(&self, source: &SchemaSnapshot, target: &SchemaSnapshot) -> Result<Changeset> {
        let normalize = self.options.normalize_constraints;
        let source_keyed = source.constraints_by_key(normalize)?;
        let target_keyed = target.constraints_by_key(normalize)?;
        let mut changes = Changeset::new();

        for key in union_keys(&source_keyed, &target_keyed) {
            match (source_keyed.get(key).copied(), target_keyed.get(key).copied()) {
                (Some(s), None) => changes.push(Change::CreateConstraint { source: s.clone() }),
                (None, Some(t)) => changes.push(Change::DropConstraint { target: t.clone() }),
                (Some(s), Some(t)) if s.matches(t, normalize) => {}
                (Some(s), Some(t)) => {
                    changes.push(Change::DropConstraint { target: t.clone() });
                    changes.push(Change::CreateConstraint { source: s.clone() });
                }
                (None, None) => {}
            }
        }

        log_changes("constraints", &changes);
        Ok(changes)
    }

    /// Indexes are matched by name and compared by definition, ignoring the
    /// schema of the indexed table
    pub fn diff_indexes(&self, source: &SchemaSnapshot, target: &SchemaSnapshot) -> Changeset {
        let mut changes = Changeset::new();

        for name in union_keys(&source.indexes, &target.indexes) {
            match (source.indexes.get(name), target.indexes.get(name)) {
                (Some(s), None) => changes.push(Change::CreateIndex { source: s.clone() }),
                (None, Some(t)) => changes.push(Change::DropIndex { target: t.clone() }),
                (Some(s), Some(t)) if s == t => {}
                (Some(s), Some(t)) => {
                    changes.push(Change::DropIndex { target: t.clone() });
                    changes.push(Change::CreateIndex { source: s.clone() });
                }
                (None, None) => {}
            }
        }

        log_changes("indexes", &changes);
        changes
    }

    fn synthesize_default(&mut self, table: &str, column: &mut ColumnDef) -> Result<()> {
        let literal = self
            .resolver
            .resolve(table, &column.name, &column.props.data_type)?;
        match literal {
            Some(literal) => {
                debug!(table, column = %column.name, default = %literal, "Using one-off default");
                column.props.column_default = Some(literal);
            }
            None => warn!(
                table,
                column = %column.name,
                "Column becomes NOT NULL without a default; existing rows may reject the migration"
            ),
        }
        Ok(())
    }
}

fn log_changes(category: &str, changes: &Changeset) {
    for change in changes {
        debug!(category, kind = %change.kind(), name = change.object_name(), "Found change");
        if change.kind() == ChangeKind::AlterTable {
            for column in change.column_changes() {
                debug!(kind = %column.kind(), column = column.column_name(), "Found column change");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{ConstraintDef, IndexDef, SequenceDef};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct Fixed(HashMap<(String, String), String>, usize);

    impl DefaultResolver for Fixed {
        fn resolve(&mut self, table: &str, column: &str, _declared_type: &str) -> Result<Option<String>> {
            self.1 += 1;
            Ok(self.0.get(&(table.to_string(), column.to_string())).cloned())
        }
    }

    fn snapshot(name: &str) -> SchemaSnapshot {
        SchemaSnapshot::new(name)
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let mut a = snapshot("s1");
        a.add_table(TableDef::new("foo").column(ColumnDef::new("bar", "integer")));
        a.add_sequence(SequenceDef::new("seq"));
        a.add_constraint(ConstraintDef::check("c", "foo", "((bar >= 0))"));
        a.add_index(IndexDef::new("idx", "foo", "CREATE INDEX idx ON s1.foo USING btree (bar)"));

        let mut b = a.clone();
        b.name = "s2".to_string();
        b.indexes.clear();
        b.add_index(IndexDef::new("idx", "foo", "CREATE INDEX idx ON s2.foo USING btree (bar)"));

        assert!(diff(&a, &b, &DiffOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn sequence_ahead_in_target_is_unchanged() {
        let mut a = snapshot("s1");
        a.add_sequence(SequenceDef::new("seq").last_value(0));
        let mut b = snapshot("s2");
        b.add_sequence(SequenceDef::new("seq").last_value(5));
        assert!(diff(&a, &b, &DiffOptions::default()).unwrap().is_empty());

        let changes = diff(&b, &a, &DiffOptions::default()).unwrap();
        assert_eq!(changes.kinds(), vec![ChangeKind::AlterSequence]);

        let options = DiffOptions {
            no_alter_sequences: true,
            ..DiffOptions::default()
        };
        assert!(diff(&b, &a, &options).unwrap().is_empty());
    }

    #[test]
    fn not_null_add_column_asks_for_default() {
        let mut a = snapshot("s1");
        a.add_table(
            TableDef::new("foo")
                .column(ColumnDef::new("a", "integer"))
                .column(ColumnDef::new("b", "integer").nullable(false)),
        );
        let mut b = snapshot("s2");
        b.add_table(TableDef::new("foo").column(ColumnDef::new("a", "integer")));

        let mut resolver = Fixed(
            HashMap::from([(("foo".to_string(), "b".to_string()), "7".to_string())]),
            0,
        );
        let options = DiffOptions::default();
        let changes = SchemaDiff::new(&options, &mut resolver).generate(&a, &b).unwrap();
        assert_eq!(resolver.1, 1);

        match &changes[0].column_changes()[0] {
            ColumnChange::AddColumn { source } => {
                assert_eq!(source.props.column_default.as_deref(), Some("7"))
            }
            other => panic!("unexpected column change {:?}", other),
        }
    }

    #[test]
    fn alter_column_only_asks_when_becoming_not_null_without_defaults() {
        let mut a = snapshot("s1");
        a.add_table(
            TableDef::new("foo")
                .column(ColumnDef::new("x", "integer").nullable(false))
                .column(ColumnDef::new("y", "integer").nullable(false).default("1"))
                .column(ColumnDef::new("z", "integer")),
        );
        let mut b = snapshot("s2");
        b.add_table(
            TableDef::new("foo")
                .column(ColumnDef::new("x", "integer"))
                .column(ColumnDef::new("y", "integer"))
                .column(ColumnDef::new("z", "integer").nullable(false)),
        );

        let mut resolver = Fixed(HashMap::new(), 0);
        let options = DiffOptions::default();
        let changes = SchemaDiff::new(&options, &mut resolver).generate(&a, &b).unwrap();
        assert_eq!(resolver.1, 1);
        assert_eq!(changes[0].column_changes().len(), 3);
    }

    #[test]
    fn changed_index_is_dropped_then_recreated() {
        let mut a = snapshot("s1");
        a.add_index(IndexDef::new("idx", "foo", "CREATE INDEX idx ON s1.foo USING btree (a)"));
        let mut b = snapshot("s2");
        b.add_index(IndexDef::new("idx", "foo", "CREATE INDEX idx ON s2.foo USING btree (b)"));

        let changes = diff(&a, &b, &DiffOptions::default()).unwrap();
        assert_eq!(changes.kinds(), vec![ChangeKind::DropIndex, ChangeKind::CreateIndex]);
    }
}
