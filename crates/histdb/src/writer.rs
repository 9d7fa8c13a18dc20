//! History writer: one INSERT into the history table per captured row.
//!
//! The writer never batches; N rows in a change set produce N history rows.
//! It only lists the columns present in the row plus the actor and action;
//! the history key and `recorded_at` come from the table defaults.

use rusqlite::{Connection, params_from_iter};
use tracing::debug;

use crate::context::HistoryContext;
use crate::errors::{HistoryError, Result};
use crate::sqlite::catalog::{self, qualified, quote_ident};
use crate::types::{Action, Row, Value};

/// Appends history rows for tracked tables.
#[derive(Clone, Copy, Debug)]
pub struct HistoryWriter<'c> {
    conn: &'c Connection,
    context: &'c HistoryContext,
}

impl<'c> HistoryWriter<'c> {
    /// Writer over `conn` using `context` for naming and bookkeeping columns.
    pub fn new(conn: &'c Connection, context: &'c HistoryContext) -> Self {
        Self { conn, context }
    }

    /// Append one history row for `row` of `table`.
    ///
    /// Returns 0 without touching the datastore when `table` is not tracked.
    pub fn record(&self, table: &str, row: &Row, action: Action, actor: Option<i64>) -> Result<usize> {
        let Some(history) = self.context.naming().history_table(table) else {
            debug!(table, "table not tracked, nothing recorded");
            return Ok(0);
        };
        if let Some(column) = row.columns().find(|c| self.context.is_bookkeeping(c)) {
            return Err(HistoryError::configuration(
                table,
                format!("column {column} collides with a bookkeeping column of {history}"),
            ));
        }

        let bookkeeping = self.context.columns();
        let mut columns: Vec<String> = row.columns().map(quote_ident).collect();
        columns.push(quote_ident(&bookkeeping.actor));
        columns.push(quote_ident(&bookkeeping.action));

        let mut params: Vec<Value> = row.values().cloned().collect();
        params.push(actor.map_or(Value::Null, Value::Integer));
        params.push(Value::Text(action.as_str().to_string()));

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified(self.context.history_schema(), &history),
            columns.join(", "),
            vec!["?"; params.len()].join(", ")
        );
        let _ = self
            .conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(HistoryError::datastore(&history, action.as_str()))?;

        metrics::counter!("history_rows_written_total", "action" => action.as_str()).increment(1);
        debug!(table, history = %history, action = %action, "history row recorded");
        Ok(1)
    }

    /// Append one history row per row, consulting the actor source for each.
    pub fn record_all(&self, table: &str, rows: &[Row], action: Action) -> Result<usize> {
        let mut written = 0;
        for row in rows {
            written += self.record(table, row, action, self.context.actor().current_actor())?;
        }
        Ok(written)
    }

    /// Name of the history table for tracked `table`, checked against the catalog.
    ///
    /// Fails with a configuration error when `table` is not tracked or its
    /// history table does not exist.
    pub fn ensure_history_table(&self, table: &str) -> Result<String> {
        let history = self.context.naming().history_table(table).ok_or_else(|| {
            HistoryError::configuration(table, "table is not tracked")
        })?;
        let schema = self.context.history_schema();
        if !catalog::table_exists(self.conn, schema, &history)? {
            return Err(HistoryError::configuration(
                table,
                format!("history table {schema}.{history} does not exist"),
            ));
        }
        Ok(history)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
