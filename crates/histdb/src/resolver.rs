//! Row resolution: turn a [`KeySpec`] into the rows it currently matches.
//!
//! Equality predicates are bound as parameters. Membership predicates only
//! accept integer-like values and are inlined as `IN (1, 2, 3)`; string or
//! blob lists are a validation error rather than an unbounded parameter list.
//! Text is accepted only in canonical integer spelling (`"12"`, not `"012"`),
//! since on a TEXT column `IN (12)` matches the text `'12'` alone.
//! Callers that need to re-read rows with non-numeric keys go through
//! [`RowResolver::resolve_by_keys`], which issues one bound equality query per
//! row instead.

use std::collections::HashSet;

use rusqlite::{Connection, params_from_iter};
use tracing::debug;

use crate::errors::{HistoryError, Result};
use crate::sqlite::catalog::quote_ident;
use crate::types::{Condition, KeySpec, KeyValue, Row, Value};

/// Reads the current state of rows in a tracked table.
#[derive(Clone, Copy, Debug)]
pub struct RowResolver<'c> {
    conn: &'c Connection,
}

impl<'c> RowResolver<'c> {
    /// Resolver over `conn`.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Rows of `table` matching `keys`, in database order.
    ///
    /// [`KeySpec::Rows`] is returned as given without querying.
    pub fn resolve(&self, table: &str, keys: &KeySpec) -> Result<Vec<Row>> {
        let condition = match keys {
            KeySpec::Rows(rows) => return Ok(rows.clone()),
            KeySpec::Single { column, value } => {
                key_condition(table, std::iter::once((column.as_str(), value)))?
            }
            KeySpec::Composite(pairs) => {
                if pairs.is_empty() {
                    return Err(HistoryError::validation(table, "composite key has no columns"));
                }
                key_condition(table, pairs.iter().map(|(c, v)| (c.as_str(), v)))?
            }
        };
        self.select_where(table, &condition)
    }

    /// `SELECT *` rows of `table` matching `condition`.
    pub fn select_where(&self, table: &str, condition: &Condition) -> Result<Vec<Row>> {
        let sql = format!("SELECT * FROM {}{}", quote_ident(table), condition.where_clause());
        self.query(table, &sql, &condition.params)
    }

    /// Only `columns` of the rows of `table` matching `condition`.
    pub fn select_columns(
        &self,
        table: &str,
        columns: &[String],
        condition: &Condition,
    ) -> Result<Vec<Row>> {
        let list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {list} FROM {}{}",
            quote_ident(table),
            condition.where_clause()
        );
        self.query(table, &sql, &condition.params)
    }

    /// Re-read full rows by their primary-key values.
    ///
    /// A single key whose values are all stored integers is fetched with one
    /// membership query; anything else (text keys included, even when they
    /// spell a number) falls back to one bound equality query per key row.
    pub fn resolve_by_keys(
        &self,
        table: &str,
        primary_key: &[String],
        key_rows: &[Row],
    ) -> Result<Vec<Row>> {
        if key_rows.is_empty() {
            return Ok(Vec::new());
        }
        if let [column] = primary_key {
            let numeric: Option<Vec<Value>> = key_rows
                .iter()
                .map(|r| match r.get(column) {
                    Some(Value::Integer(i)) => Some(Value::Integer(*i)),
                    _ => None,
                })
                .collect();
            if let Some(values) = numeric {
                return self.resolve(table, &KeySpec::single(column, values));
            }
        }
        let columns: Vec<&str> = primary_key.iter().map(String::as_str).collect();
        let mut rows = Vec::with_capacity(key_rows.len());
        for key_row in key_rows {
            let keys = KeySpec::from_row(table, &columns, key_row)?;
            rows.extend(self.resolve(table, &keys)?);
        }
        Ok(rows)
    }

    fn query(&self, table: &str, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(HistoryError::datastore(table, "SELECT"))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Row::from_sqlite(row, &names)
            })
            .map_err(HistoryError::datastore(table, "SELECT"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(HistoryError::datastore(table, "SELECT"))?;
        debug!(table, rows = rows.len(), "resolved rows");
        Ok(rows)
    }
}

/// Conjunction of per-column equality/membership predicates.
fn key_condition<'k>(
    table: &str,
    pairs: impl Iterator<Item = (&'k str, &'k KeyValue)>,
) -> Result<Condition> {
    let mut seen = HashSet::new();
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for (column, value) in pairs {
        if column.is_empty() {
            return Err(HistoryError::validation(table, "key column name is empty"));
        }
        if !seen.insert(column) {
            return Err(HistoryError::validation(
                table,
                format!("key column {column} given more than once"),
            ));
        }
        match value {
            KeyValue::One(Value::Null) => {
                return Err(HistoryError::validation(
                    table,
                    format!("no value present for key column {column}"),
                ));
            }
            KeyValue::One(v) => {
                clauses.push(format!("{} = ?", quote_ident(column)));
                params.push(v.clone());
            }
            KeyValue::Many(values) => {
                if values.is_empty() {
                    return Err(HistoryError::validation(
                        table,
                        format!("empty membership list for key column {column}"),
                    ));
                }
                let mut ids = Vec::with_capacity(values.len());
                for v in values {
                    let id = integer_like(v).ok_or_else(|| {
                        HistoryError::validation(
                            table,
                            format!("non-numeric value {v:?} in membership list for {column}"),
                        )
                    })?;
                    ids.push(id.to_string());
                }
                clauses.push(format!("{} IN ({})", quote_ident(column), ids.join(", ")));
            }
        }
    }
    Ok(Condition {
        sql: clauses.join(" AND "),
        params,
    })
}

/// Integer value of `value` if it is an integer, an integral real, or text
/// in canonical integer spelling (no sign, padding, or leading zeros beyond
/// what `i64::to_string` produces).
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integer_like(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Real(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => Some(*f as i64),
        Value::Text(s) => {
            let n: i64 = s.parse().ok()?;
            (n.to_string() == *s).then_some(n)
        }
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE p_orders (id INTEGER PRIMARY KEY, x INTEGER, tag TEXT);
             INSERT INTO p_orders VALUES (1, 10, 'a'), (2, 20, 'b'), (3, 30, 'a');
             CREATE TABLE p_lines (order_id INTEGER, line_no INTEGER, qty INTEGER,
                                   PRIMARY KEY (order_id, line_no));
             INSERT INTO p_lines VALUES (1, 1, 5), (1, 2, 6), (2, 1, 7);
             CREATE TABLE p_codes (code TEXT PRIMARY KEY, label TEXT);
             INSERT INTO p_codes VALUES ('a', 'A'), ('b', 'B'), ('c', 'C');
             CREATE TABLE p_zip (code TEXT PRIMARY KEY, city TEXT);
             INSERT INTO p_zip VALUES ('01234', 'x'), ('1234', 'y');",
        )
        .unwrap();
        conn
    }

    fn ids(rows: &[Row], column: &str) -> Vec<Value> {
        rows.iter().map(|r| r.get(column).unwrap().clone()).collect()
    }

    #[test]
    fn single_scalar() {
        let conn = setup();
        let rows = RowResolver::new(&conn)
            .resolve("p_orders", &KeySpec::single("id", 2))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("x"), Some(&Value::Integer(20)));
        assert_eq!(
            rows[0].columns().collect::<Vec<_>>(),
            vec!["id", "x", "tag"]
        );
    }

    #[test]
    fn single_membership() {
        let conn = setup();
        let mut rows = RowResolver::new(&conn)
            .resolve("p_orders", &KeySpec::single("id", vec![1_i64, 3]))
            .unwrap();
        rows.sort_by_key(|r| match r.get("id") {
            Some(Value::Integer(i)) => *i,
            _ => 0,
        });
        assert_eq!(ids(&rows, "id"), vec![Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn membership_accepts_integer_like_text() {
        let conn = setup();
        let rows = RowResolver::new(&conn)
            .resolve(
                "p_orders",
                &KeySpec::single("id", vec![Value::Text("2".into()), Value::Real(3.0)]),
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn membership_rejects_non_numeric() {
        let conn = setup();
        let err = RowResolver::new(&conn)
            .resolve(
                "p_codes",
                &KeySpec::single("code", vec![Value::Text("a".into())]),
            )
            .unwrap_err();
        assert_matches!(err, HistoryError::Validation { ref table, .. } if table == "p_codes");
    }

    #[test]
    fn membership_rejects_non_canonical_numeric_text() {
        let conn = setup();
        let resolver = RowResolver::new(&conn);
        for text in ["01234", " 2", "+2", "2 "] {
            assert_matches!(
                resolver.resolve("p_zip", &KeySpec::single("code", vec![Value::Text(text.into())])),
                Err(HistoryError::Validation { .. }),
                "{text:?}"
            );
        }
    }

    #[test]
    fn canonical_numeric_text_matches_text_column() {
        let conn = setup();
        let rows = RowResolver::new(&conn)
            .resolve("p_zip", &KeySpec::single("code", vec![Value::Text("1234".into())]))
            .unwrap();
        assert_eq!(ids(&rows, "city"), vec![Value::Text("y".into())]);
    }

    #[test]
    fn resolve_by_numeric_looking_text_keys() {
        let conn = setup();
        let key_rows = vec![
            Row::new().with("code", "01234".to_string()),
            Row::new().with("code", "1234".to_string()),
        ];
        let rows = RowResolver::new(&conn)
            .resolve_by_keys("p_zip", &["code".to_string()], &key_rows)
            .unwrap();
        assert_eq!(
            ids(&rows, "city"),
            vec![Value::Text("x".into()), Value::Text("y".into())]
        );
    }

    #[test]
    fn membership_rejects_empty_list() {
        let conn = setup();
        let err = RowResolver::new(&conn)
            .resolve("p_orders", &KeySpec::single("id", Vec::<i64>::new()))
            .unwrap_err();
        assert_matches!(err, HistoryError::Validation { .. });
    }

    #[test]
    fn composite_conjunction() {
        let conn = setup();
        let rows = RowResolver::new(&conn)
            .resolve(
                "p_lines",
                &KeySpec::composite([
                    ("order_id", KeyValue::from(1)),
                    ("line_no", KeyValue::from(vec![1_i64, 2])),
                ]),
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn composite_rejects_duplicate_and_empty() {
        let conn = setup();
        let resolver = RowResolver::new(&conn);
        assert_matches!(
            resolver.resolve("p_lines", &KeySpec::composite([("order_id", 1), ("order_id", 2)])),
            Err(HistoryError::Validation { .. })
        );
        assert_matches!(
            resolver.resolve("p_lines", &KeySpec::Composite(Vec::new())),
            Err(HistoryError::Validation { .. })
        );
    }

    #[test]
    fn null_scalar_is_missing_value() {
        let conn = setup();
        assert_matches!(
            RowResolver::new(&conn).resolve("p_orders", &KeySpec::single("id", Value::Null)),
            Err(HistoryError::Validation { .. })
        );
    }

    #[test]
    fn explicit_rows_bypass_query() {
        let conn = setup();
        let given = vec![Row::new().with("id", 99).with("x", 1)];
        let rows = RowResolver::new(&conn)
            .resolve("p_orders", &KeySpec::rows(given.clone()))
            .unwrap();
        assert_eq!(rows, given);
    }

    #[test]
    fn unknown_column_is_datastore_error() {
        let conn = setup();
        assert_matches!(
            RowResolver::new(&conn).resolve("p_orders", &KeySpec::single("nope", 1)),
            Err(HistoryError::Datastore { ref action, .. }) if action == "SELECT"
        );
    }

    #[test]
    fn select_columns_and_where() {
        let conn = setup();
        let resolver = RowResolver::new(&conn);
        let keys = resolver
            .select_columns(
                "p_orders",
                &["id".to_string()],
                &Condition::new("tag = ?", vec![Value::Text("a".into())]),
            )
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].len(), 1);
        assert_eq!(resolver.select_where("p_orders", &Condition::all()).unwrap().len(), 3);
    }

    #[test]
    fn resolve_by_text_keys_uses_equality() {
        let conn = setup();
        let key_rows = vec![
            Row::new().with("code", "a".to_string()),
            Row::new().with("code", "c".to_string()),
        ];
        let rows = RowResolver::new(&conn)
            .resolve_by_keys("p_codes", &["code".to_string()], &key_rows)
            .unwrap();
        assert_eq!(
            ids(&rows, "label"),
            vec![Value::Text("A".into()), Value::Text("C".into())]
        );
    }

    #[test]
    fn resolve_by_composite_keys() {
        let conn = setup();
        let key_rows = vec![Row::new().with("order_id", 1).with("line_no", 2)];
        let rows = RowResolver::new(&conn)
            .resolve_by_keys(
                "p_lines",
                &["order_id".to_string(), "line_no".to_string()],
                &key_rows,
            )
            .unwrap();
        assert_eq!(ids(&rows, "qty"), vec![Value::Integer(6)]);
    }

    proptest! {
        #[test]
        fn alphabetic_membership_always_rejected(word in "[a-zA-Z]{1,12}") {
            let conn = setup();
            let result = RowResolver::new(&conn)
                .resolve("p_orders", &KeySpec::single("id", vec![Value::Text(word)]));
            prop_assert!(matches!(result, Err(HistoryError::Validation { .. })), "expected Validation error, got {:?}", result);
        }

        #[test]
        fn integer_membership_never_rejected(values in proptest::collection::vec(any::<i64>(), 1..20)) {
            let conn = setup();
            let result = RowResolver::new(&conn).resolve("p_orders", &KeySpec::single("id", values));
            prop_assert!(result.is_ok());
        }
    }
}
