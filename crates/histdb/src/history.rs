//! Reading history back.
//!
//! History rows are append-only; this module only ever selects from them.

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::context::HistoryContext;
use crate::errors::{HistoryError, Result};
use crate::sqlite::catalog::{self, qualified, quote_ident};
use crate::types::{Action, Row, Value};

/// Format `CURRENT_TIMESTAMP` writes.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One history row, split into the snapshot and its bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRecord {
    /// Synthesized history key.
    pub history_id: i64,
    /// Tracked-table column values at capture time.
    pub values: Row,
    /// Acting user, if any.
    pub actor: Option<i64>,
    /// Captured mutation.
    pub action: Action,
    /// Write time (UTC).
    pub recorded_at: NaiveDateTime,
}

/// All history rows of tracked `table` in write order.
pub fn read_history(
    conn: &Connection,
    context: &HistoryContext,
    table: &str,
) -> Result<Vec<HistoryRecord>> {
    let history = context
        .naming()
        .history_table(table)
        .ok_or_else(|| HistoryError::configuration(table, "table is not tracked"))?;
    let schema = context.history_schema();
    let key = catalog::primary_key(conn, schema, &history)?;
    let [key] = key.as_slice() else {
        return Err(HistoryError::configuration(
            table,
            format!("history table {schema}.{history} has no single-column key"),
        ));
    };

    let sql = format!(
        "SELECT * FROM {} ORDER BY {}",
        qualified(schema, &history),
        quote_ident(key)
    );
    let mut stmt = conn.prepare(&sql).map_err(HistoryError::datastore(&history, "SELECT"))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map([], |row| Row::from_sqlite(row, &names))
        .map_err(HistoryError::datastore(&history, "SELECT"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(HistoryError::datastore(&history, "SELECT"))?;

    rows.into_iter()
        .map(|row| split_record(table, context, key, row))
        .collect()
}

/// Number of history rows of tracked `table` with `action`.
pub fn count_actions(
    conn: &Connection,
    context: &HistoryContext,
    table: &str,
    action: Action,
) -> Result<usize> {
    Ok(read_history(conn, context, table)?
        .iter()
        .filter(|r| r.action == action)
        .count())
}

fn split_record(table: &str, context: &HistoryContext, key: &str, row: Row) -> Result<HistoryRecord> {
    let bookkeeping = context.columns();
    let mut history_id = None;
    let mut actor = None;
    let mut action = None;
    let mut recorded_at = None;
    let mut values = Row::new();

    for (column, value) in row.iter() {
        if column == key {
            history_id = Some(as_integer(table, column, value)?);
        } else if column == bookkeeping.actor {
            actor = match value {
                Value::Null => None,
                other => Some(as_integer(table, column, other)?),
            };
        } else if column == bookkeeping.action {
            let text = as_text(table, column, value)?;
            action = Some(text.parse::<Action>().map_err(|e| HistoryError::validation(table, e))?);
        } else if column == bookkeeping.recorded_at {
            let text = as_text(table, column, value)?;
            recorded_at = Some(NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map_err(
                |e| HistoryError::validation(table, format!("bad {column} value {text:?}: {e}")),
            )?);
        } else {
            values.set(column, value.clone());
        }
    }

    let missing = |what: &str| HistoryError::configuration(table, format!("history row has no {what}"));
    Ok(HistoryRecord {
        history_id: history_id.ok_or_else(|| missing("history key"))?,
        values,
        actor,
        action: action.ok_or_else(|| missing(bookkeeping.action.as_str()))?,
        recorded_at: recorded_at.ok_or_else(|| missing(bookkeeping.recorded_at.as_str()))?,
    })
}

fn as_integer(table: &str, column: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        other => Err(HistoryError::validation(
            table,
            format!("expected integer in {column}, found {other:?}"),
        )),
    }
}

fn as_text<'v>(table: &str, column: &str, value: &'v Value) -> Result<&'v str> {
    match value {
        Value::Text(s) => Ok(s.as_str()),
        other => Err(HistoryError::validation(
            table,
            format!("expected text in {column}, found {other:?}"),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
