//! The four mutating primitives and their uncaptured implementation.
//!
//! [`TableWriter`] is the operation surface the interceptor decorates.
//! [`DirectWriter`] generates and runs the SQL with no history side effects;
//! the interceptor delegates to it for the business statement itself.

use rusqlite::{Connection, params_from_iter};
use tracing::debug;

use crate::errors::{HistoryError, Result};
use crate::sqlite::catalog::quote_ident;
use crate::types::{Condition, Row, Statement, Value};

/// Insert, update, delete and upsert against a named table.
///
/// Each operation returns the number of rows the datastore reports affected.
pub trait TableWriter {
    /// `INSERT INTO table (row columns) VALUES (row values)`.
    fn insert(&self, table: &str, row: &Row) -> Result<usize>;

    /// `UPDATE table SET (values) WHERE condition`.
    fn update(&self, table: &str, values: &Row, condition: &Condition) -> Result<usize>;

    /// `DELETE FROM table WHERE condition`.
    fn delete(&self, table: &str, condition: &Condition) -> Result<usize>;

    /// Insert `row`, or update the existing row sharing its `unique` columns.
    fn upsert(&self, table: &str, row: &Row, unique: &[&str]) -> Result<usize>;
}

/// Runs statements straight against the connection.
#[derive(Clone, Copy, Debug)]
pub struct DirectWriter<'c> {
    conn: &'c Connection,
}

impl<'c> DirectWriter<'c> {
    /// Writer over `conn`.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Run a caller-written statement, tagging failures with `table` and `action`.
    pub fn execute(&self, table: &str, action: &str, statement: &Statement) -> Result<usize> {
        let affected = self
            .conn
            .execute(&statement.sql, params_from_iter(statement.params.iter()))
            .map_err(HistoryError::datastore(table, action))?;
        debug!(table, action, rows = affected, "statement executed");
        Ok(affected)
    }
}

impl TableWriter for DirectWriter<'_> {
    fn insert(&self, table: &str, row: &Row) -> Result<usize> {
        self.execute(table, "INSERT", &insert_statement(table, row))
    }

    fn update(&self, table: &str, values: &Row, condition: &Condition) -> Result<usize> {
        self.execute(table, "UPDATE", &update_statement(table, values, condition)?)
    }

    fn delete(&self, table: &str, condition: &Condition) -> Result<usize> {
        self.execute(table, "DELETE", &delete_statement(table, condition))
    }

    fn upsert(&self, table: &str, row: &Row, unique: &[&str]) -> Result<usize> {
        self.execute(table, "UPSERT", &upsert_statement(table, row, unique)?)
    }
}

fn column_list(row: &Row) -> String {
    row.columns().map(quote_ident).collect::<Vec<_>>().join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn values_of(row: &Row) -> Vec<Value> {
    row.values().cloned().collect()
}

pub(crate) fn insert_statement(table: &str, row: &Row) -> Statement {
    if row.is_empty() {
        return Statement::new(
            &format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)),
            Vec::new(),
        );
    }
    Statement::new(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            column_list(row),
            placeholders(row.len())
        ),
        values_of(row),
    )
}

pub(crate) fn update_statement(table: &str, values: &Row, condition: &Condition) -> Result<Statement> {
    if values.is_empty() {
        return Err(HistoryError::validation(table, "update sets no columns"));
    }
    let assignments = values
        .columns()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params = values_of(values);
    params.extend(condition.params.iter().cloned());
    Ok(Statement::new(
        &format!(
            "UPDATE {} SET {assignments}{}",
            quote_ident(table),
            condition.where_clause()
        ),
        params,
    ))
}

pub(crate) fn delete_statement(table: &str, condition: &Condition) -> Statement {
    Statement::new(
        &format!("DELETE FROM {}{}", quote_ident(table), condition.where_clause()),
        condition.params.clone(),
    )
}

pub(crate) fn upsert_statement(table: &str, row: &Row, unique: &[&str]) -> Result<Statement> {
    if unique.is_empty() {
        return Err(HistoryError::validation(table, "upsert needs at least one unique column"));
    }
    if let Some(missing) = unique.iter().find(|c| !row.contains(c)) {
        return Err(HistoryError::validation(
            table,
            format!("no value present for unique column {missing}"),
        ));
    }
    let target = unique.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let updates: Vec<String> = row
        .columns()
        .filter(|c| !unique.contains(c))
        .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    Ok(Statement::new(
        &format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({target}) {action}",
            quote_ident(table),
            column_list(row),
            placeholders(row.len())
        ),
        values_of(row),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE p_items (id INTEGER PRIMARY KEY, sku TEXT UNIQUE, qty INTEGER DEFAULT 0)",
        )
        .unwrap();
        conn
    }

    fn qty(conn: &Connection, sku: &str) -> i64 {
        conn.query_row("SELECT qty FROM p_items WHERE sku = ?1", [sku], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn insert_sql_shape() {
        let stmt = insert_statement("p_items", &Row::new().with("sku", "a".to_string()).with("qty", 1));
        assert_eq!(stmt.sql, "INSERT INTO \"p_items\" (\"sku\", \"qty\") VALUES (?, ?)");
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn empty_insert_uses_defaults() {
        let conn = setup();
        let writer = DirectWriter::new(&conn);
        assert_eq!(writer.insert("p_items", &Row::new()).unwrap(), 1);
        let n: i64 = conn.query_row("SELECT qty FROM p_items", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn update_binds_values_before_condition() {
        let conn = setup();
        let writer = DirectWriter::new(&conn);
        writer.insert("p_items", &Row::new().with("sku", "a".to_string()).with("qty", 1)).unwrap();
        let n = writer
            .update(
                "p_items",
                &Row::new().with("qty", 5),
                &Condition::eq("sku", "a".to_string()),
            )
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(qty(&conn, "a"), 5);
    }

    #[test]
    fn empty_update_rejected() {
        let conn = setup();
        assert_matches!(
            DirectWriter::new(&conn).update("p_items", &Row::new(), &Condition::all()),
            Err(HistoryError::Validation { .. })
        );
    }

    #[test]
    fn delete_with_condition() {
        let conn = setup();
        let writer = DirectWriter::new(&conn);
        writer.insert("p_items", &Row::new().with("sku", "a".to_string())).unwrap();
        writer.insert("p_items", &Row::new().with("sku", "b".to_string())).unwrap();
        assert_eq!(writer.delete("p_items", &Condition::eq("sku", "a".to_string())).unwrap(), 1);
        assert_eq!(writer.delete("p_items", &Condition::eq("sku", "a".to_string())).unwrap(), 0);
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let conn = setup();
        let writer = DirectWriter::new(&conn);
        let row = Row::new().with("sku", "a".to_string()).with("qty", 1);
        writer.upsert("p_items", &row, &["sku"]).unwrap();
        writer.upsert("p_items", &row.clone().with("qty", 9), &["sku"]).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM p_items", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
        assert_eq!(qty(&conn, "a"), 9);
    }

    #[test]
    fn upsert_only_unique_columns_does_nothing_on_conflict() {
        let stmt = upsert_statement("p_items", &Row::new().with("sku", "a".to_string()), &["sku"]).unwrap();
        assert!(stmt.sql.ends_with("ON CONFLICT (\"sku\") DO NOTHING"), "{}", stmt.sql);
    }

    #[test]
    fn upsert_requires_unique_values() {
        assert_matches!(
            upsert_statement("p_items", &Row::new().with("qty", 1), &["sku"]),
            Err(HistoryError::Validation { .. })
        );
    }

    #[test]
    fn failures_carry_table_and_action() {
        let conn = setup();
        let err = DirectWriter::new(&conn)
            .insert("p_missing", &Row::new().with("x", 1))
            .unwrap_err();
        assert_matches!(
            err,
            HistoryError::Datastore { ref table, ref action, .. }
                if table == "p_missing" && action == "INSERT"
        );
    }
}
