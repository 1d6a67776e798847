//! Changes and changesets
//!
//! A [`Change`] is one migration step between a source entity and a target
//! entity. Its priority decides where it lands once the [`Changeset`] is
//! sorted, so that no statement depends on something a later one creates
//! or on something an earlier one dropped.

use serde::Serialize;
use std::fmt;

use crate::schema::types::{ColumnDef, ConstraintDef, ConstraintKind, IndexDef, SequenceDef, TableDef};

/// Discriminant of a [`Change`] or [`ColumnChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeKind {
    CreateTable,
    DropTable,
    AlterTable,
    AddColumn,
    DropColumn,
    AlterColumn,
    CreateSequence,
    DropSequence,
    AlterSequence,
    CreateConstraint,
    DropConstraint,
    CreateIndex,
    DropIndex,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One schema-level migration step
///
/// `source` is the side being copied from, `target` the side being
/// migrated. Create changes only carry a source, drop changes only a
/// target.
#[derive(Debug, Clone)]
pub enum Change {
    CreateTable { source: TableDef },
    DropTable { target: TableDef },
    AlterTable {
        source: TableDef,
        target: TableDef,
        columns: Vec<ColumnChange>,
    },
    CreateSequence { source: SequenceDef },
    DropSequence { target: SequenceDef },
    AlterSequence { source: SequenceDef, target: SequenceDef },
    CreateConstraint { source: ConstraintDef },
    DropConstraint { target: ConstraintDef },
    CreateIndex { source: IndexDef },
    DropIndex { target: IndexDef },
}

/// One column-level step inside an `AlterTable`
#[derive(Debug, Clone)]
pub enum ColumnChange {
    /// `source` carries any synthesized default in its `column_default`
    AddColumn { source: ColumnDef },
    DropColumn { target: ColumnDef },
    AlterColumn { source: ColumnDef, target: ColumnDef },
}

impl Change {
    /// Which kind of change this is
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::CreateTable { .. } => ChangeKind::CreateTable,
            Change::DropTable { .. } => ChangeKind::DropTable,
            Change::AlterTable { .. } => ChangeKind::AlterTable,
            Change::CreateSequence { .. } => ChangeKind::CreateSequence,
            Change::DropSequence { .. } => ChangeKind::DropSequence,
            Change::AlterSequence { .. } => ChangeKind::AlterSequence,
            Change::CreateConstraint { .. } => ChangeKind::CreateConstraint,
            Change::DropConstraint { .. } => ChangeKind::DropConstraint,
            Change::CreateIndex { .. } => ChangeKind::CreateIndex,
            Change::DropIndex { .. } => ChangeKind::DropIndex,
        }
    }

    /// Execution order; lower runs first
    pub fn priority(&self) -> u32 {
        match self {
            Change::DropIndex { .. } => 0,
            Change::DropConstraint { target } => match target.kind {
                ConstraintKind::ForeignKey(_) => 10,
                ConstraintKind::PrimaryKey { .. } => 11,
                ConstraintKind::Unique { .. } => 12,
                _ => 15,
            },
            Change::DropTable { .. } => 20,
            Change::DropSequence { .. } => 30,
            Change::CreateSequence { .. } => 40,
            Change::AlterSequence { .. } => 50,
            Change::CreateTable { .. } => 60,
            Change::AlterTable { .. } => 70,
            Change::CreateConstraint { source } => match source.kind {
                ConstraintKind::Unique { .. } => 80,
                ConstraintKind::PrimaryKey { .. } => 81,
                ConstraintKind::ForeignKey(_) => 82,
                _ => 85,
            },
            Change::CreateIndex { .. } => 90,
        }
    }

    /// Name of the entity this change is about
    pub fn object_name(&self) -> &str {
        match self {
            Change::CreateTable { source } | Change::AlterTable { source, .. } => &source.name,
            Change::DropTable { target } => &target.name,
            Change::CreateSequence { source } | Change::AlterSequence { source, .. } => &source.name,
            Change::DropSequence { target } => &target.name,
            Change::CreateConstraint { source } => &source.name,
            Change::DropConstraint { target } => &target.name,
            Change::CreateIndex { source } => &source.name,
            Change::DropIndex { target } => &target.name,
        }
    }

    /// Column-level steps of an `AlterTable`, empty for everything else
    pub fn column_changes(&self) -> &[ColumnChange] {
        match self {
            Change::AlterTable { columns, .. } => columns,
            _ => &[],
        }
    }
}

impl ColumnChange {
    /// Which kind of change this is
    pub fn kind(&self) -> ChangeKind {
        match self {
            ColumnChange::AddColumn { .. } => ChangeKind::AddColumn,
            ColumnChange::DropColumn { .. } => ChangeKind::DropColumn,
            ColumnChange::AlterColumn { .. } => ChangeKind::AlterColumn,
        }
    }

    /// Clause order inside one `ALTER TABLE`
    pub fn priority(&self) -> u32 {
        match self {
            ColumnChange::DropColumn { .. } => 71,
            ColumnChange::AddColumn { .. } => 72,
            ColumnChange::AlterColumn { .. } => 73,
        }
    }

    /// Name of the column this change is about
    pub fn column_name(&self) -> &str {
        match self {
            ColumnChange::AddColumn { source } | ColumnChange::AlterColumn { source, .. } => &source.name,
            ColumnChange::DropColumn { target } => &target.name,
        }
    }
}

/// An ordered collection of changes
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    changes: Vec<Change>,
}

impl Changeset {
    /// Create an empty changeset
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one change
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Concatenate another changeset onto this one
    pub fn merge(mut self, other: Changeset) -> Changeset {
        self.changes.extend(other.changes);
        self
    }

    /// Stable sort by priority; equal priorities keep discovery order
    pub fn sort(&mut self) {
        self.changes.sort_by_key(Change::priority);
    }

    /// Builder form of [`Changeset::sort`]
    pub fn sorted(mut self) -> Changeset {
        self.sort();
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Change> {
        self.changes.get(index)
    }

    /// Kinds in order, mostly useful for assertions and logging
    pub fn kinds(&self) -> Vec<ChangeKind> {
        self.changes.iter().map(Change::kind).collect()
    }
}

impl From<Vec<Change>> for Changeset {
    fn from(changes: Vec<Change>) -> Self {
        Self { changes }
    }
}

impl FromIterator<Change> for Changeset {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

impl Extend<Change> for Changeset {
    fn extend<I: IntoIterator<Item = Change>>(&mut self, iter: I) {
        self.changes.extend(iter);
    }
}

impl IntoIterator for Changeset {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a> IntoIterator for &'a Changeset {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl std::ops::Index<usize> for Changeset {
    type Output = Change;

    fn index(&self, index: usize) -> &Change {
        &self.changes[index]
    }
}
