//! Default value resolution
//!
//! When a column becomes `NOT NULL` without a default, existing rows need a
//! value. A [`DefaultResolver`] supplies one as an already-rendered SQL
//! literal, or declines.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::utils::naming::quote_literal;

/// Supplies one-off defaults for columns turning `NOT NULL`
pub trait DefaultResolver {
    /// Returns a rendered literal, or `None` to proceed without a default
    fn resolve(&mut self, table: &str, column: &str, declared_type: &str) -> Result<Option<String>>;
}

/// Never supplies a default
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDefaults;

impl DefaultResolver for NoDefaults {
    fn resolve(&mut self, _table: &str, _column: &str, _declared_type: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A literal accepted as a one-off default
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultLiteral {
    Integer(i64),
    Decimal(String),
    Boolean(bool),
    Text(String),
    Now,
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
}

impl DefaultLiteral {
    /// Render as PostgreSQL literal syntax
    pub fn to_sql(&self) -> String {
        match self {
            DefaultLiteral::Integer(value) => value.to_string(),
            DefaultLiteral::Decimal(value) => value.clone(),
            DefaultLiteral::Boolean(true) => "TRUE".to_string(),
            DefaultLiteral::Boolean(false) => "FALSE".to_string(),
            DefaultLiteral::Text(value) => quote_literal(value),
            DefaultLiteral::Now => "NOW()".to_string(),
            DefaultLiteral::Date(date) => format!("'{}'::date", date.format("%Y-%m-%d")),
            DefaultLiteral::Timestamp(ts) => format!("'{}'::timestamp", ts.format("%Y-%m-%dT%H:%M:%S%.f")),
            DefaultLiteral::TimestampTz(ts) => format!("'{}'::timestamptz", ts.to_rfc3339()),
        }
    }
}

impl fmt::Display for DefaultLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

impl FromStr for DefaultLiteral {
    type Err = Error;

    /// Integers, decimals, booleans, `'quoted'` or `"quoted"` strings, `NOW`,
    /// and unquoted ISO dates or datetimes
    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidDefault("empty input".to_string()));
        }

        match input.to_uppercase().as_str() {
            "NOW" | "NOW()" => return Ok(DefaultLiteral::Now),
            "TRUE" => return Ok(DefaultLiteral::Boolean(true)),
            "FALSE" => return Ok(DefaultLiteral::Boolean(false)),
            _ => {}
        }

        if let Ok(value) = input.parse::<i64>() {
            return Ok(DefaultLiteral::Integer(value));
        }
        if is_decimal(input) {
            return Ok(DefaultLiteral::Decimal(input.to_string()));
        }
        if let Some(text) = unquote(input, '\'').or_else(|| unquote(input, '"')) {
            return text.map(DefaultLiteral::Text);
        }

        if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
            return Ok(DefaultLiteral::TimestampTz(ts));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(ts) = NaiveDateTime::parse_from_str(input, format) {
                return Ok(DefaultLiteral::Timestamp(ts));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            return Ok(DefaultLiteral::Date(date));
        }

        Err(Error::InvalidDefault(format!(
            "{input:?} is not a number, a quoted string, an ISO date or datetime, or NOW"
        )))
    }
}

fn is_decimal(input: &str) -> bool {
    let digits = input.strip_prefix(['-', '+']).unwrap_or(input);
    match digits.split_once('.') {
        Some((whole, fraction)) => {
            !(whole.is_empty() && fraction.is_empty())
                && whole.chars().all(|c| c.is_ascii_digit())
                && fraction.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// `None` if `input` is not wrapped in `quote`; otherwise the content with
/// doubled quotes collapsed, or an error for a stray quote inside
fn unquote(input: &str, quote: char) -> Option<Result<String>> {
    let inner = input.strip_prefix(quote)?.strip_suffix(quote)?;
    let doubled: String = [quote, quote].iter().collect();
    if inner.replace(&doubled, "").contains(quote) {
        return Some(Err(Error::InvalidDefault(format!(
            "unbalanced {quote} in {input}; double it to embed one"
        ))));
    }
    Some(Ok(inner.replace(&doubled, &quote.to_string())))
}

/// Defaults known ahead of time, keyed by table then column
#[derive(Debug, Clone, Default)]
pub struct PresetDefaults {
    values: HashMap<String, HashMap<String, DefaultLiteral>>,
}

impl PresetDefaults {
    /// Parse configured literals; any invalid entry is a configuration error
    pub fn from_config(raw: &HashMap<String, HashMap<String, String>>) -> Result<Self> {
        let mut values: HashMap<String, HashMap<String, DefaultLiteral>> = HashMap::new();
        for (table, columns) in raw {
            for (column, literal) in columns {
                let parsed = literal.parse::<DefaultLiteral>().map_err(|e| {
                    Error::ConfigError(format!("Default for {}.{}: {}", table, column, e))
                })?;
                values
                    .entry(table.clone())
                    .or_default()
                    .insert(column.clone(), parsed);
            }
        }
        Ok(Self { values })
    }

    /// Register one default
    pub fn insert(&mut self, table: &str, column: &str, literal: DefaultLiteral) {
        self.values
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), literal);
    }

    pub fn get(&self, table: &str, column: &str) -> Option<&DefaultLiteral> {
        self.values.get(table)?.get(column)
    }
}

impl DefaultResolver for PresetDefaults {
    fn resolve(&mut self, table: &str, column: &str, _declared_type: &str) -> Result<Option<String>> {
        Ok(self.get(table, column).map(DefaultLiteral::to_sql))
    }
}

/// Asks an operator for each missing default, after checking presets
///
/// Invalid answers are reported and asked again; an empty answer (or end
/// of input) declines. Each (table, column) is only asked once per run.
pub struct InteractiveDefaults<R, W> {
    presets: PresetDefaults,
    input: R,
    output: W,
    answered: HashMap<(String, String), Option<String>>,
}

impl<R: BufRead, W: Write> InteractiveDefaults<R, W> {
    pub fn new(presets: PresetDefaults, input: R, output: W) -> Self {
        Self {
            presets,
            input,
            output,
            answered: HashMap::new(),
        }
    }

    fn ask(&mut self, table: &str, column: &str, declared_type: &str) -> Result<Option<String>> {
        writeln!(
            self.output,
            " Column {}.{} (type {}) is becoming NOT NULL without a default!",
            table, column, declared_type
        )?;
        writeln!(
            self.output,
            " Enter a one-off default: a number, a 'quoted string', an ISO date or datetime, or NOW."
        )?;
        writeln!(self.output, " Leave empty to continue without one.")?;

        loop {
            write!(self.output, " >>>> ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 || line.trim().is_empty() {
                return Ok(None);
            }
            match line.parse::<DefaultLiteral>() {
                Ok(literal) => return Ok(Some(literal.to_sql())),
                Err(e) => writeln!(self.output, " ! Invalid input: {}", e)?,
            }
        }
    }
}

impl<R: BufRead, W: Write> DefaultResolver for InteractiveDefaults<R, W> {
    fn resolve(&mut self, table: &str, column: &str, declared_type: &str) -> Result<Option<String>> {
        let key = (table.to_string(), column.to_string());
        if let Some(answer) = self.answered.get(&key) {
            return Ok(answer.clone());
        }
        if let Some(literal) = self.presets.get(table, column) {
            return Ok(Some(literal.to_sql()));
        }

        let answer = self.ask(table, column, declared_type)?;
        tracing::debug!(table, column, default = ?answer, "Collected default");
        self.answered.insert(key, answer.clone());
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_literal_grammar() {
        assert_eq!("7".parse::<DefaultLiteral>().unwrap().to_sql(), "7");
        assert_eq!("-1.50".parse::<DefaultLiteral>().unwrap().to_sql(), "-1.50");
        assert_eq!("'foo'".parse::<DefaultLiteral>().unwrap().to_sql(), "'foo'");
        assert_eq!("\"foo\"".parse::<DefaultLiteral>().unwrap().to_sql(), "'foo'");
        assert_eq!("'it''s'".parse::<DefaultLiteral>().unwrap().to_sql(), "'it''s'");
        assert_eq!("NOW".parse::<DefaultLiteral>().unwrap().to_sql(), "NOW()");
        assert_eq!("now()".parse::<DefaultLiteral>().unwrap().to_sql(), "NOW()");
        assert_eq!("true".parse::<DefaultLiteral>().unwrap().to_sql(), "TRUE");
        assert_eq!(
            "2024-03-01".parse::<DefaultLiteral>().unwrap().to_sql(),
            "'2024-03-01'::date"
        );
        assert_eq!(
            "2024-03-01T12:30:00".parse::<DefaultLiteral>().unwrap().to_sql(),
            "'2024-03-01T12:30:00'::timestamp"
        );
        assert_eq!(
            "2024-03-01T12:30:00+02:00".parse::<DefaultLiteral>().unwrap().to_sql(),
            "'2024-03-01T12:30:00+02:00'::timestamptz"
        );
    }

    #[test]
    fn rejects_code_and_stray_quotes() {
        assert!("datetime.date.today()".parse::<DefaultLiteral>().is_err());
        assert!("__import__('os')".parse::<DefaultLiteral>().is_err());
        assert!("'a'b'".parse::<DefaultLiteral>().is_err());
        assert!("".parse::<DefaultLiteral>().is_err());
        assert!(".".parse::<DefaultLiteral>().is_err());
    }

    #[test]
    fn interactive_reprompts_until_valid() {
        let input = Cursor::new(b"oops(\n7\n".to_vec());
        let mut output = Vec::new();
        let mut resolver = InteractiveDefaults::new(PresetDefaults::default(), input, &mut output);

        let value = resolver.resolve("foo", "bar", "integer").unwrap();
        assert_eq!(value.as_deref(), Some("7"));
        drop(resolver);

        let transcript = String::from_utf8(output).unwrap();
        assert!(transcript.contains("Column foo.bar (type integer) is becoming NOT NULL"));
        assert!(transcript.contains(" ! Invalid input:"));
    }

    #[test]
    fn interactive_empty_answer_declines_and_is_remembered() {
        let input = Cursor::new(b"\n".to_vec());
        let mut resolver = InteractiveDefaults::new(PresetDefaults::default(), input, Vec::new());
        assert_eq!(resolver.resolve("foo", "bar", "integer").unwrap(), None);
        // input is exhausted; a second prompt would still decline, but it must not prompt
        assert_eq!(resolver.resolve("foo", "bar", "integer").unwrap(), None);
        assert_eq!(resolver.answered.len(), 1);
    }

    #[test]
    fn interactive_answers_are_memoized() {
        let input = Cursor::new(b"'x'\n'y'\n".to_vec());
        let mut resolver = InteractiveDefaults::new(PresetDefaults::default(), input, Vec::new());
        assert_eq!(resolver.resolve("t", "c", "text").unwrap().as_deref(), Some("'x'"));
        assert_eq!(resolver.resolve("t", "c", "text").unwrap().as_deref(), Some("'x'"));
        assert_eq!(resolver.resolve("t", "d", "text").unwrap().as_deref(), Some("'y'"));
    }

    #[test]
    fn presets_win_over_prompting() {
        let mut raw = HashMap::new();
        raw.insert(
            "foo".to_string(),
            HashMap::from([("bar".to_string(), "NOW".to_string())]),
        );
        let presets = PresetDefaults::from_config(&raw).unwrap();
        let mut resolver = InteractiveDefaults::new(presets, Cursor::new(Vec::new()), Vec::new());
        assert_eq!(resolver.resolve("foo", "bar", "timestamp").unwrap().as_deref(), Some("NOW()"));
    }

    #[test]
    fn invalid_preset_is_a_config_error() {
        let mut raw = HashMap::new();
        raw.insert(
            "foo".to_string(),
            HashMap::from([("bar".to_string(), "nope nope".to_string())]),
        );
        assert!(matches!(PresetDefaults::from_config(&raw), Err(Error::ConfigError(_))));
    }
}
