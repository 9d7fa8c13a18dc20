//! Value types shared by the resolver, writer, and interceptor.
//!
//! - [`Action`]: the three kinds of captured mutation.
//! - [`Row`]: an ordered column → value map (one table row).
//! - [`KeySpec`]: which rows an operation targets.
//! - [`Condition`] / [`Statement`]: caller-supplied SQL with bound parameters.

use std::fmt;
use std::str::FromStr;

pub use rusqlite::types::Value;

use crate::errors::{HistoryError, Result};

/// Kind of mutation recorded in a history row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Row created.
    Insert,
    /// Row changed; the history row holds the post-update state.
    Update,
    /// Row removed; the history row holds the pre-delete state.
    Delete,
}

impl Action {
    /// All actions, in the order the history `CHECK` constraint lists them.
    pub const ALL: [Action; 3] = [Action::Insert, Action::Update, Action::Delete];

    /// Wire form stored in the history table.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unknown history action: {other:?}")),
        }
    }
}

/// An ordered column → value map.
///
/// Column order follows insertion (or result-set) order; setting an existing
/// column replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Row::set`].
    #[must_use]
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set `column`, replacing any existing value.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(slot) = self.columns.iter_mut().find(|(name, _)| name == column) {
            slot.1 = value;
        } else {
            self.columns.push((column.to_string(), value));
        }
    }

    /// Value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Whether `column` is present (even if NULL).
    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Values in column order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, value)| value)
    }

    /// Project onto `columns`, skipping any the row lacks.
    pub fn project(&self, columns: &[String]) -> Row {
        columns
            .iter()
            .filter_map(|c| self.get(c).map(|v| (c.clone(), v.clone())))
            .collect()
    }

    /// Map a result row using the statement's column names.
    pub(crate) fn from_sqlite(row: &rusqlite::Row<'_>, names: &[String]) -> rusqlite::Result<Row> {
        let mut columns = Vec::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            columns.push((name.clone(), row.get::<_, Value>(idx)?));
        }
        Ok(Row { columns })
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.set(&name, value);
        }
        row
    }
}

/// A key value: a scalar (equality) or a list (membership).
#[derive(Clone, Debug, PartialEq)]
pub enum KeyValue {
    /// `column = value`
    One(Value),
    /// `column IN (values...)`; integer-like values only.
    Many(Vec<Value>),
}

impl From<Value> for KeyValue {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::One(Value::Integer(value))
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::One(Value::Integer(i64::from(value)))
    }
}

impl From<Vec<Value>> for KeyValue {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values)
    }
}

impl From<Vec<i64>> for KeyValue {
    fn from(values: Vec<i64>) -> Self {
        Self::Many(values.into_iter().map(Value::Integer).collect())
    }
}

/// Which rows an operation targets.
#[derive(Clone, Debug, PartialEq)]
pub enum KeySpec {
    /// One key column.
    Single {
        /// Key column.
        column: String,
        /// Scalar or membership list.
        value: KeyValue,
    },
    /// Several key columns, AND-ed together.
    Composite(Vec<(String, KeyValue)>),
    /// Rows the caller already holds in full; resolution returns them as-is.
    Rows(Vec<Row>),
}

impl KeySpec {
    /// Single-column key.
    pub fn single(column: &str, value: impl Into<KeyValue>) -> Self {
        Self::Single {
            column: column.to_string(),
            value: value.into(),
        }
    }

    /// Multi-column key.
    pub fn composite<I, S, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<KeyValue>,
    {
        Self::Composite(
            pairs
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        )
    }

    /// Explicit rows.
    pub fn rows(rows: Vec<Row>) -> Self {
        Self::Rows(rows)
    }

    /// Equality key over `columns`, taking each value from `row`.
    ///
    /// Fails when a claimed key column has no value in `row`.
    pub fn from_row(table: &str, columns: &[&str], row: &Row) -> Result<Self> {
        if columns.is_empty() {
            return Err(HistoryError::validation(table, "key has no columns"));
        }
        let mut pairs = Vec::with_capacity(columns.len());
        for column in columns {
            let value = row.get(column).ok_or_else(|| {
                HistoryError::validation(table, format!("no value present for key column {column}"))
            })?;
            pairs.push(((*column).to_string(), KeyValue::One(value.clone())));
        }
        Ok(if pairs.len() == 1 {
            let (column, value) = pairs.remove(0);
            Self::Single { column, value }
        } else {
            Self::Composite(pairs)
        })
    }
}

/// A `WHERE` fragment with anonymous `?` placeholders.
///
/// An empty `sql` matches every row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Condition {
    /// SQL text without the `WHERE` keyword.
    pub sql: String,
    /// Bound parameters, in placeholder order.
    pub params: Vec<Value>,
}

impl Condition {
    /// Fragment with parameters.
    pub fn new(sql: &str, params: Vec<Value>) -> Self {
        Self {
            sql: sql.to_string(),
            params,
        }
    }

    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// `"column" = ?`
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            sql: format!("{} = ?", crate::sqlite::catalog::quote_ident(column)),
            params: vec![value.into()],
        }
    }

    /// ` WHERE ...` suffix, or nothing for an empty condition.
    pub(crate) fn where_clause(&self) -> String {
        if self.sql.trim().is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }
}

/// A complete caller-written statement with bound parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<Value>,
}

impl Statement {
    /// Statement with parameters.
    pub fn new(sql: &str, params: Vec<Value>) -> Self {
        Self {
            sql: sql.to_string(),
            params,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn action_wire_form() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert_eq!(Action::Update.to_string(), "UPDATE");
        assert!("update".parse::<Action>().is_err());
    }

    #[test]
    fn row_set_replaces_in_place() {
        let mut row = Row::new().with("id", 1).with("x", 2);
        row.set("id", 7);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "x"]);
        assert_eq!(row.get("id"), Some(&Value::Integer(7)));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn row_project_skips_missing() {
        let row = Row::new().with("id", 1).with("x", 2);
        let projected = row.project(&["x".to_string(), "nope".to_string()]);
        assert_eq!(projected, Row::new().with("x", 2));
    }

    #[test]
    fn key_from_row_single_and_composite() {
        let row = Row::new().with("a", 1).with("b", 2);
        assert_eq!(
            KeySpec::from_row("p_t", &["a"], &row).unwrap(),
            KeySpec::single("a", 1)
        );
        assert_eq!(
            KeySpec::from_row("p_t", &["a", "b"], &row).unwrap(),
            KeySpec::composite([("a", 1), ("b", 2)])
        );
    }

    #[test]
    fn key_from_row_missing_value() {
        let row = Row::new().with("a", 1);
        let err = KeySpec::from_row("p_t", &["a", "b"], &row).unwrap_err();
        assert_matches!(err, HistoryError::Validation { ref message, .. } if message.contains("b"));
    }

    #[test]
    fn condition_where_clause() {
        assert_eq!(Condition::all().where_clause(), "");
        assert_eq!(Condition::eq("id", 5).where_clause(), " WHERE \"id\" = ?");
    }
}
