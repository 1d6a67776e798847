//! Type definitions for schema snapshots
//!
//! A [`SchemaSnapshot`] is the in-memory capture of one schema's catalog state.
//! It is filled once by a catalog reader and treated as read-only while diffing.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::utils::naming::strip_index_schema;

/// Represents the catalog state of one schema
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    pub name: String,
    pub tables: IndexMap<String, TableDef>,
    pub sequences: IndexMap<String, SequenceDef>,
    /// Keyed by constraint name; see [`SchemaSnapshot::constraints_by_key`]
    pub constraints: IndexMap<String, ConstraintDef>,
    pub indexes: IndexMap<String, IndexDef>,
    pub types: TypeCatalog,
}

impl SchemaSnapshot {
    /// Create a new empty snapshot for the named schema
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: IndexMap::new(),
            sequences: IndexMap::new(),
            constraints: IndexMap::new(),
            indexes: IndexMap::new(),
            types: TypeCatalog::for_schema(name),
        }
    }

    /// Add a table to the snapshot
    pub fn add_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Add a sequence to the snapshot
    pub fn add_sequence(&mut self, sequence: SequenceDef) {
        self.sequences.insert(sequence.name.clone(), sequence);
    }

    /// Add a constraint to the snapshot
    pub fn add_constraint(&mut self, constraint: ConstraintDef) {
        self.constraints.insert(constraint.name.clone(), constraint);
    }

    /// Add an index to the snapshot
    pub fn add_index(&mut self, index: IndexDef) {
        self.indexes.insert(index.name.clone(), index);
    }

    /// Constraints keyed by their comparison key.
    ///
    /// Without normalization the key is the constraint name. With it, two
    /// constraints that only differ by name land on the same key. If two
    /// constraints of one snapshot normalize to the same key the later one
    /// wins.
    pub fn constraints_by_key(&self, normalize: bool) -> Result<IndexMap<String, &ConstraintDef>> {
        let mut keyed = IndexMap::with_capacity(self.constraints.len());
        for constraint in self.constraints.values() {
            let key = constraint.comparison_key(normalize)?;
            if let Some(previous) = keyed.insert(key.clone(), constraint) {
                tracing::warn!(
                    schema = %self.name,
                    key = %key,
                    replaced = %previous.name,
                    by = %constraint.name,
                    "Normalized constraint key collision"
                );
            }
        }
        Ok(keyed)
    }
}

/// Represents a table and its columns in catalog order
#[derive(Debug, Clone, Serialize)]
pub struct TableDef {
    pub name: String,
    pub columns: IndexMap<String, ColumnDef>,
}

impl TableDef {
    /// Create a new table with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: IndexMap::new(),
        }
    }

    /// Add a column to the table
    pub fn add_column(&mut self, mut column: ColumnDef) {
        column.table_name = self.name.clone();
        self.columns.insert(column.name.clone(), column);
    }

    /// Builder form of [`TableDef::add_column`]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.add_column(column);
        self
    }

    /// Union of column names, this table's order first
    pub fn column_names_with<'a>(&'a self, other: &'a TableDef) -> Vec<&'a str> {
        union_keys(&self.columns, &other.columns)
    }
}

// Column order is not significant; only presence and properties are.
impl PartialEq for TableDef {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .all(|(name, column)| other.columns.get(name) == Some(column))
    }
}

/// Represents a table column
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDef {
    /// Owning table, for lookups only
    pub table_name: String,
    pub name: String,
    pub props: ColumnProps,
}

/// Catalog properties of a column; two columns are equal iff these are
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnProps {
    pub data_type: String,
    pub udt_name: String,
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub datetime_precision: Option<i32>,
    pub column_default: Option<String>,
    pub is_nullable: bool,
}

impl ColumnDef {
    /// Create a new nullable column with the given name and type
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            table_name: String::new(),
            name: name.to_string(),
            props: ColumnProps {
                data_type: data_type.to_string(),
                udt_name: data_type.to_string(),
                character_maximum_length: None,
                numeric_precision: None,
                numeric_scale: None,
                datetime_precision: None,
                column_default: None,
                is_nullable: true,
            },
        }
    }

    /// Set the underlying type name (`udt_name`)
    pub fn udt(mut self, udt_name: &str) -> Self {
        self.props.udt_name = udt_name.to_string();
        self
    }

    /// Set whether the column is nullable
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.props.is_nullable = nullable;
        self
    }

    /// Set a default expression for the column
    pub fn default(mut self, default: &str) -> Self {
        self.props.column_default = Some(default.to_string());
        self
    }

    /// Set the character maximum length
    pub fn length(mut self, length: i32) -> Self {
        self.props.character_maximum_length = Some(length);
        self
    }

    /// Set numeric precision and scale
    pub fn precision(mut self, precision: i32, scale: Option<i32>) -> Self {
        self.props.numeric_precision = Some(precision);
        self.props.numeric_scale = scale;
        self
    }

    /// Set the fractional seconds precision of a time, timestamp or interval
    pub fn datetime_precision(mut self, precision: i32) -> Self {
        self.props.datetime_precision = Some(precision);
        self
    }

    /// Whether the column is declared through the generic array marker
    pub fn is_array(&self) -> bool {
        self.props.data_type == "ARRAY"
    }

    /// Whether any property that makes up the column's type differs
    pub fn type_differs(&self, other: &ColumnDef) -> bool {
        let (a, b) = (&self.props, &other.props);
        a.data_type != b.data_type
            || a.udt_name != b.udt_name
            || a.character_maximum_length != b.character_maximum_length
            || a.numeric_precision != b.numeric_precision
            || a.numeric_scale != b.numeric_scale
            || a.datetime_precision != b.datetime_precision
    }
}

impl PartialEq for ColumnDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.props == other.props
    }
}

/// Represents a sequence
///
/// `None` bounds stand for the dialect's implicit minimum or maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceDef {
    pub name: String,
    pub start_value: i64,
    pub increment_by: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cache_value: i64,
    pub is_cycled: bool,
    pub last_value: i64,
}

impl SequenceDef {
    /// Create a sequence with the dialect defaults
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_value: 1,
            increment_by: 1,
            min_value: None,
            max_value: None,
            cache_value: 1,
            is_cycled: false,
            last_value: 1,
        }
    }

    /// Set the last value handed out
    pub fn last_value(mut self, last_value: i64) -> Self {
        self.last_value = last_value;
        self
    }

    /// Everything except `last_value` matches
    pub fn same_definition(&self, other: &SequenceDef) -> bool {
        self.start_value == other.start_value
            && self.increment_by == other.increment_by
            && self.min_value == other.min_value
            && self.max_value == other.max_value
            && self.cache_value == other.cache_value
            && self.is_cycled == other.is_cycled
    }

    /// Asymmetric equality: `self` is the source side, `target` the side
    /// being migrated. A target that has merely advanced further counts as
    /// unchanged.
    pub fn satisfied_by(&self, target: &SequenceDef) -> bool {
        self.same_definition(target) && self.last_value <= target.last_value
    }
}

/// The kind-specific part of a constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConstraintKind {
    PrimaryKey { columns: BTreeSet<String> },
    Unique { columns: BTreeSet<String> },
    ForeignKey(ForeignKeyRef),
    Check { clause: String },
    /// Anything the catalog reports that has no dedicated handling
    Other { constraint_type: String },
}

/// Columns and target of a foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyRef {
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

impl ForeignKeyRef {
    /// A foreign key with `NO ACTION` referential rules
    pub fn new(columns: &[&str], ref_table: &str, ref_columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ref_table: ref_table.to_string(),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
            on_update: "NO ACTION".to_string(),
            on_delete: "NO ACTION".to_string(),
        }
    }
}

/// Represents a table constraint
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintDef {
    pub name: String,
    pub table_name: String,
    pub kind: ConstraintKind,
    pub is_deferrable: bool,
    pub initially_deferred: bool,
}

impl ConstraintDef {
    /// Create a non-deferrable constraint
    pub fn new(name: &str, table_name: &str, kind: ConstraintKind) -> Self {
        Self {
            name: name.to_string(),
            table_name: table_name.to_string(),
            kind,
            is_deferrable: false,
            initially_deferred: false,
        }
    }

    /// Build a primary key over the given columns
    pub fn primary_key(name: &str, table_name: &str, columns: &[&str]) -> Self {
        Self::new(
            name,
            table_name,
            ConstraintKind::PrimaryKey {
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        )
    }

    /// Build a unique constraint over the given columns
    pub fn unique(name: &str, table_name: &str, columns: &[&str]) -> Self {
        Self::new(
            name,
            table_name,
            ConstraintKind::Unique {
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        )
    }

    /// Build a check constraint
    pub fn check(name: &str, table_name: &str, clause: &str) -> Self {
        Self::new(
            name,
            table_name,
            ConstraintKind::Check {
                clause: clause.to_string(),
            },
        )
    }

    /// Set deferrability flags
    pub fn deferrable(mut self, is_deferrable: bool, initially_deferred: bool) -> Self {
        self.is_deferrable = is_deferrable;
        self.initially_deferred = initially_deferred;
        self
    }

    /// The SQL keyword(s) naming this constraint's type
    pub fn constraint_type(&self) -> &str {
        match &self.kind {
            ConstraintKind::PrimaryKey { .. } => "PRIMARY KEY",
            ConstraintKind::Unique { .. } => "UNIQUE",
            ConstraintKind::ForeignKey(_) => "FOREIGN KEY",
            ConstraintKind::Check { .. } => "CHECK",
            ConstraintKind::Other { constraint_type } => constraint_type,
        }
    }

    /// The key used to match this constraint against the other snapshot
    pub fn comparison_key(&self, normalize: bool) -> Result<String> {
        if !normalize {
            return Ok(self.name.clone());
        }

        let key = match &self.kind {
            ConstraintKind::PrimaryKey { columns } | ConstraintKind::Unique { columns } => format!(
                "{}_{}_{}",
                self.constraint_type(),
                self.table_name,
                columns.iter().map(String::as_str).collect::<Vec<_>>().join("_")
            ),
            ConstraintKind::ForeignKey(fk) => format!(
                "{}_{}_{}__to__{}",
                self.constraint_type(),
                self.table_name,
                sorted_join(&fk.columns),
                sorted_join(&fk.ref_columns)
            ),
            ConstraintKind::Check { clause } => format!("CHECK_{}_{}", self.table_name, clause),
            ConstraintKind::Other { constraint_type } => {
                return Err(Error::UnknownConstraintType {
                    name: self.name.clone(),
                    constraint_type: constraint_type.clone(),
                })
            }
        };
        Ok(key)
    }

    /// Compare full payloads; the name is ignored under normalization
    pub fn matches(&self, other: &ConstraintDef, normalize: bool) -> bool {
        (normalize || self.name == other.name)
            && self.table_name == other.table_name
            && self.kind == other.kind
            && self.is_deferrable == other.is_deferrable
            && self.initially_deferred == other.initially_deferred
    }
}

fn sorted_join(columns: &[String]) -> String {
    let mut sorted: Vec<&str> = columns.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join("_")
}

/// Represents an index by its literal definition
#[derive(Debug, Clone, Serialize)]
pub struct IndexDef {
    pub name: String,
    pub table_name: String,
    pub definition: String,
    comparison_definition: String,
}

impl IndexDef {
    /// Create an index from its `CREATE INDEX` text
    pub fn new(name: &str, table_name: &str, definition: &str) -> Self {
        Self {
            name: name.to_string(),
            table_name: table_name.to_string(),
            definition: definition.to_string(),
            comparison_definition: strip_index_schema(definition),
        }
    }

    /// The definition with the owning schema removed
    pub fn comparison_definition(&self) -> &str {
        &self.comparison_definition
    }
}

impl PartialEq for IndexDef {
    fn eq(&self, other: &Self) -> bool {
        self.comparison_definition == other.comparison_definition
    }
}

pub const PG_CATALOG: &str = "pg_catalog";

/// One `pg_type` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeInfo {
    pub oid: u32,
    pub namespace: String,
    pub typname: String,
    pub sql_type: String,
    /// Element type for array types, 0 otherwise
    pub typelem: u32,
}

/// Length, precision and scale of an array column's element type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ColumnDims {
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub datetime_precision: Option<i32>,
}

/// Type lookups the emitters need beyond the standard information views
///
/// Names are kept per namespace; lookups try `pg_catalog` before the catalog's
/// own schema, the way an unqualified type name resolves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeCatalog {
    schema: String,
    by_name: HashMap<String, HashMap<String, TypeInfo>>,
    by_oid: HashMap<u32, TypeInfo>,
    array_dims: HashMap<String, HashMap<String, ColumnDims>>,
}

impl TypeCatalog {
    /// Empty catalog for types read alongside the named schema
    pub fn for_schema(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            ..Self::default()
        }
    }

    /// SQL spelling for a catalog type name
    pub fn sql_type_for(typname: &str) -> String {
        let bare = typname.replace('_', "");
        match bare.as_str() {
            "int2" => "smallint".to_string(),
            "int4" => "integer".to_string(),
            "int8" => "bigint".to_string(),
            "bpchar" => "character".to_string(),
            _ => typname.to_string(),
        }
    }

    /// Register a built-in `pg_type` row
    pub fn add_type(&mut self, oid: u32, typname: &str, typelem: u32) {
        self.add_type_in(PG_CATALOG, oid, typname, typelem);
    }

    /// Register a `pg_type` row from the given namespace
    pub fn add_type_in(&mut self, namespace: &str, oid: u32, typname: &str, typelem: u32) {
        let sql_type = if namespace == PG_CATALOG {
            Self::sql_type_for(typname)
        } else {
            typname.to_string()
        };
        let info = TypeInfo {
            oid,
            namespace: namespace.to_string(),
            typname: typname.to_string(),
            sql_type,
            typelem,
        };
        self.by_oid.insert(oid, info.clone());
        self.by_name
            .entry(info.namespace.clone())
            .or_default()
            .insert(info.typname.clone(), info);
    }

    /// Look a type up by name
    pub fn by_name(&self, typname: &str) -> Option<&TypeInfo> {
        [PG_CATALOG, self.schema.as_str()]
            .into_iter()
            .find_map(|namespace| self.by_name.get(namespace)?.get(typname))
    }

    /// Whether a type belongs to the catalog's own schema rather than `pg_catalog`
    pub fn is_local(&self, info: &TypeInfo) -> bool {
        info.namespace != PG_CATALOG && info.namespace == self.schema
    }

    /// Look a type up by oid
    pub fn by_oid(&self, oid: u32) -> Option<&TypeInfo> {
        self.by_oid.get(&oid)
    }

    /// Resolve the element type of an array type
    pub fn element_type(&self, array_udt_name: &str) -> Option<&TypeInfo> {
        self.by_name(array_udt_name)
            .and_then(|array| self.by_oid(array.typelem))
    }

    /// Record element dimensions for an array column
    pub fn set_array_dims(&mut self, table: &str, column: &str, dims: ColumnDims) {
        self.array_dims
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), dims);
    }

    /// Element dimensions for an array column, if they were read
    pub fn array_dims(&self, table: &str, column: &str) -> Option<ColumnDims> {
        self.array_dims.get(table)?.get(column).copied()
    }
}

/// Keys of `a` in order, then keys only in `b`
pub(crate) fn union_keys<'a, V>(a: &'a IndexMap<String, V>, b: &'a IndexMap<String, V>) -> Vec<&'a str> {
    a.keys()
        .chain(b.keys().filter(|key| !a.contains_key(*key)))
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_equality_ignores_column_order() {
        let a = TableDef::new("foo")
            .column(ColumnDef::new("a", "integer"))
            .column(ColumnDef::new("b", "text"));
        let b = TableDef::new("foo")
            .column(ColumnDef::new("b", "text"))
            .column(ColumnDef::new("a", "integer"));
        assert_eq!(a, b);

        let c = TableDef::new("foo").column(ColumnDef::new("a", "integer"));
        assert_ne!(a, c);
    }

    #[test]
    fn sequence_equality_is_asymmetric() {
        let ahead = SequenceDef::new("foo").last_value(2);
        let behind = SequenceDef::new("foo").last_value(0);
        assert!(!ahead.satisfied_by(&behind));
        assert!(behind.satisfied_by(&ahead));
    }

    #[test]
    fn normalized_keys() {
        let pk = ConstraintDef::primary_key("foo_pkey", "foo", &["b", "a"]);
        assert_eq!(pk.comparison_key(false).unwrap(), "foo_pkey");
        assert_eq!(pk.comparison_key(true).unwrap(), "PRIMARY KEY_foo_a_b");

        let fk = ConstraintDef::new(
            "fk_one",
            "source",
            ConstraintKind::ForeignKey(ForeignKeyRef::new(&["fk"], "target", &["pk"])),
        );
        assert_eq!(fk.comparison_key(true).unwrap(), "FOREIGN KEY_source_fk__to__pk");

        let check = ConstraintDef::check("c", "foo", "((bar >= 0))");
        assert_eq!(check.comparison_key(true).unwrap(), "CHECK_foo_((bar >= 0))");
    }

    #[test]
    fn unknown_constraint_type_is_fatal_when_normalizing() {
        let other = ConstraintDef::new(
            "ex",
            "foo",
            ConstraintKind::Other {
                constraint_type: "EXCLUDE".to_string(),
            },
        );
        assert!(other.comparison_key(false).is_ok());
        assert!(matches!(
            other.comparison_key(true),
            Err(Error::UnknownConstraintType { .. })
        ));
    }

    #[test]
    fn index_equality_ignores_schema() {
        let a = IndexDef::new("idx", "foo", "CREATE INDEX idx ON s1.foo USING btree (baz)");
        let b = IndexDef::new("idx", "foo", "CREATE INDEX idx ON s2.foo USING btree (baz)");
        assert_eq!(a, b);
        assert_eq!(a.comparison_definition(), "CREATE INDEX idx ON foo USING btree (baz)");
    }

    #[test]
    fn array_element_lookup() {
        let mut types = TypeCatalog::default();
        types.add_type(23, "int4", 0);
        types.add_type(1007, "_int4", 23);
        assert_eq!(types.element_type("_int4").unwrap().sql_type, "integer");
        assert_eq!(TypeCatalog::sql_type_for("bpchar"), "character");
        assert_eq!(TypeCatalog::sql_type_for("numeric"), "numeric");
    }

    #[test]
    fn same_type_name_in_two_namespaces() {
        let mut types = TypeCatalog::for_schema("s1");
        types.add_type_in("s1", 16400, "mood", 0);
        types.add_type_in("other", 16500, "mood", 0);
        types.add_type(25, "text", 0);
        types.add_type_in("s1", 16401, "text", 0);

        let mood = types.by_name("mood").unwrap();
        assert_eq!(mood.oid, 16400);
        assert!(types.is_local(mood));
        assert_eq!(types.by_oid(16500).unwrap().namespace, "other");
        assert_eq!(types.by_name("text").unwrap().oid, 25);
        assert!(types.by_name("missing").is_none());
    }

    #[test]
    fn datetime_precision_is_part_of_the_type() {
        let a = ColumnDef::new("ts", "timestamp without time zone").datetime_precision(3);
        let b = ColumnDef::new("ts", "timestamp without time zone").datetime_precision(6);
        assert!(a.type_differs(&b));
        assert!(!a.type_differs(&a.clone()));
    }
}
