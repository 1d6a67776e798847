//! Naming utilities for pgdiff
//!
//! Identifier and literal quoting for PostgreSQL, and the schema rewriting
//! applied to index definitions.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;

/// PostgreSQL key words that are reserved, including those that may only
/// be used as function or type names
const PG_RESERVED_WORDS: &[&str] = &[
    "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC",
    "AUTHORIZATION", "BINARY", "BOTH", "CASE", "CAST", "CHECK", "COLLATE", "COLLATION",
    "COLUMN", "CONCURRENTLY", "CONSTRAINT", "CREATE", "CROSS", "CURRENT_CATALOG",
    "CURRENT_DATE", "CURRENT_ROLE", "CURRENT_SCHEMA", "CURRENT_TIME", "CURRENT_TIMESTAMP",
    "CURRENT_USER", "DEFAULT", "DEFERRABLE", "DESC", "DISTINCT", "DO", "ELSE", "END",
    "EXCEPT", "FALSE", "FETCH", "FOR", "FOREIGN", "FREEZE", "FROM", "FULL", "GRANT",
    "GROUP", "HAVING", "ILIKE", "IN", "INITIALLY", "INNER", "INTERSECT", "INTO", "IS",
    "ISNULL", "JOIN", "LATERAL", "LEADING", "LEFT", "LIKE", "LIMIT", "LOCALTIME",
    "LOCALTIMESTAMP", "NATURAL", "NOT", "NOTNULL", "NULL", "OFFSET", "ON", "ONLY", "OR",
    "ORDER", "OUTER", "OVERLAPS", "PLACING", "PRIMARY", "REFERENCES", "RETURNING", "RIGHT",
    "SELECT", "SESSION_USER", "SIMILAR", "SOME", "SYMMETRIC", "TABLE", "TABLESAMPLE",
    "THEN", "TO", "TRAILING", "TRUE", "UNION", "UNIQUE", "USER", "USING", "VARIADIC",
    "VERBOSE", "WHEN", "WHERE", "WINDOW", "WITH",
];

static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| PG_RESERVED_WORDS.iter().copied().collect());

static PLAIN_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_$]*$").expect("identifier pattern is valid"));

/// Everything up to (and including) the `ON` of an index definition, plus
/// the schema qualifier of the indexed table when there is one
static INDEX_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?P<head>.*? ON (?:ONLY )?)(?:"(?:[^"]|"")+"\.|[^\s."(]+\.)?"#)
        .expect("index pattern is valid")
});

/// Check if a name is a reserved PostgreSQL key word
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED.contains(name.to_uppercase().as_str())
}

/// Quote an identifier when PostgreSQL would not read it back verbatim
pub fn quote_ident(name: &str) -> String {
    if is_reserved_word(name) || !PLAIN_IDENTIFIER.is_match(name) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

/// `schema.name`, each part quoted as needed
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Render a string as a PostgreSQL string literal
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{}'", escaped)
    }
}

/// Remove the schema qualifier of the indexed table (`ON s.foo` -> `ON foo`)
pub fn strip_index_schema(definition: &str) -> String {
    INDEX_TARGET
        .replace(definition, |caps: &Captures| caps["head"].to_string())
        .into_owned()
}

/// Point an index definition at `schema` (`ON s.foo` -> `ON schema.foo`)
pub fn qualify_index_definition(definition: &str, schema: &str) -> String {
    let schema = quote_ident(schema);
    INDEX_TARGET
        .replace(definition, |caps: &Captures| format!("{}{}.", &caps["head"], schema))
        .into_owned()
}
