//! The capture interceptor.
//!
//! [`HistoricalConnection`] decorates a connection with history capture. Every
//! write to a tracked table runs inside one nested transaction scope together
//! with the history rows it produces:
//!
//! | operation | resolve                     | mutate | record            |
//! |-----------|-----------------------------|--------|-------------------|
//! | insert    | after, by key or identity   | first  | `INSERT`          |
//! | update    | keys before, rows after     | middle | `UPDATE`          |
//! | delete    | full rows before            | last   | `DELETE`          |
//! | upsert    | by unique key first         | middle | `INSERT`/`UPDATE` |
//!
//! The business statement is issued through the same [`TableWriter`] surface
//! with the instance-local `capturing` flag set, so it passes straight
//! through instead of being captured a second time.

use std::cell::Cell;

use rusqlite::Connection;
use tracing::{debug, debug_span, warn};

use crate::command::{DirectWriter, TableWriter};
use crate::context::HistoryContext;
use crate::errors::{HistoryError, Result};
use crate::resolver::RowResolver;
use crate::schema::SchemaMirror;
use crate::sqlite::Datastore;
use crate::sqlite::catalog::TableSchema;
use crate::transaction::NestedTransaction;
use crate::types::{Action, Condition, KeySpec, Row, Statement, Value};
use crate::writer::HistoryWriter;

/// A connection whose writes to tracked tables are historized.
pub struct HistoricalConnection<'c> {
    conn: &'c Connection,
    context: HistoryContext,
    tx: NestedTransaction<'c>,
    capturing: Cell<bool>,
}

impl<'c> HistoricalConnection<'c> {
    /// Wrap `datastore` with capture configured by `context`.
    pub fn new<D: Datastore + ?Sized>(datastore: &'c D, context: HistoryContext) -> Self {
        let conn = datastore.connection();
        Self {
            conn,
            context,
            tx: NestedTransaction::new(conn),
            capturing: Cell::new(false),
        }
    }

    /// The wrapped connection.
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// The engine configuration.
    pub fn context(&self) -> &HistoryContext {
        &self.context
    }

    /// The nested transaction every capture runs in. Callers may open outer
    /// levels themselves to group several writes.
    pub fn transaction(&self) -> &NestedTransaction<'c> {
        &self.tx
    }

    /// Run `f` inside one transaction level.
    pub fn transaction_scope<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.tx.scope(f)
    }

    /// Whether a capture is in progress on this instance.
    pub fn is_capturing(&self) -> bool {
        self.capturing.get()
    }

    /// Run `f` with capture suspended on this instance.
    pub fn without_capture<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = CaptureGuard::set(&self.capturing);
        f()
    }

    /// Schema operations mirrored onto history tables.
    pub fn schema(&self) -> SchemaMirror<'_, 'c> {
        SchemaMirror::new(self)
    }

    /// Run a caller-written `INSERT` of one row into `table`, capturing the
    /// inserted row by its generated identity.
    pub fn execute_insert(&self, table: &str, statement: &Statement) -> Result<usize> {
        if !self.should_capture(table) {
            return self.direct().execute(table, "INSERT", statement);
        }
        self.captured(table, "INSERT", || {
            self.insert_flow(table, None, || self.direct().execute(table, "INSERT", statement))
        })
    }

    /// Run a caller-written `UPDATE` of the rows `keys` selects.
    ///
    /// If `keys` matches nothing the statement is not run and 0 is returned.
    pub fn execute_update(&self, table: &str, statement: &Statement, keys: &KeySpec) -> Result<usize> {
        if !self.should_capture(table) {
            return self.direct().execute(table, "UPDATE", statement);
        }
        self.captured(table, "UPDATE", || {
            let schema = self.prepare(table)?;
            let before = self.resolver().resolve(table, keys)?;
            if before.is_empty() {
                debug!(table, "no rows matched, update skipped");
                return Ok(0);
            }
            let key_rows: Vec<Row> = before.iter().map(|r| r.project(&schema.primary_key)).collect();
            let affected = self.guarded(|| self.direct().execute(table, "UPDATE", statement))?;
            self.record_updated(table, &schema.primary_key, &key_rows)?;
            Ok(affected)
        })
    }

    /// Run a caller-written `DELETE` of the rows `keys` selects, recording
    /// their state first.
    ///
    /// If `keys` matches nothing the statement is not run and 0 is returned.
    pub fn execute_delete(&self, table: &str, statement: &Statement, keys: &KeySpec) -> Result<usize> {
        if !self.should_capture(table) {
            return self.direct().execute(table, "DELETE", statement);
        }
        self.captured(table, "DELETE", || {
            let _ = self.writer().ensure_history_table(table)?;
            let rows = self.resolver().resolve(table, keys)?;
            if rows.is_empty() {
                debug!(table, "no rows matched, delete skipped");
                return Ok(0);
            }
            let _ = self.writer().record_all(table, &rows, Action::Delete)?;
            self.guarded(|| self.direct().execute(table, "DELETE", statement))
        })
    }

    /// Run a caller-written insert-or-update whose conflict target is
    /// `unique_keys`.
    pub fn capture_upsert(
        &self,
        table: &str,
        unique_keys: &KeySpec,
        statement: &Statement,
    ) -> Result<usize> {
        if !self.should_capture(table) {
            return self.direct().execute(table, "UPSERT", statement);
        }
        self.captured(table, "UPSERT", || {
            self.upsert_flow(table, unique_keys, None, || {
                self.direct().execute(table, "UPSERT", statement)
            })
        })
    }

    /// Record an insert the caller already performed; `row` is the final row.
    pub fn capture_insert(&self, table: &str, row: &Row) -> Result<usize> {
        self.capture_direct(table, Action::Insert, &KeySpec::Rows(vec![row.clone()]))
    }

    /// Record the current state of the rows `keys` selects as updated.
    /// Call after the update.
    pub fn capture_update(&self, table: &str, keys: &KeySpec) -> Result<usize> {
        self.capture_direct(table, Action::Update, keys)
    }

    /// Record the current state of the rows `keys` selects as deleted.
    /// Call before the delete.
    pub fn capture_delete(&self, table: &str, keys: &KeySpec) -> Result<usize> {
        self.capture_direct(table, Action::Delete, keys)
    }

    // ─── Internal ───────────────────────────────────────────────────────────

    pub(crate) fn should_capture(&self, table: &str) -> bool {
        self.context.enabled() && !self.capturing.get() && self.context.naming().is_tracked(table)
    }

    fn direct(&self) -> DirectWriter<'c> {
        DirectWriter::new(self.conn)
    }

    fn resolver(&self) -> RowResolver<'c> {
        RowResolver::new(self.conn)
    }

    fn writer(&self) -> HistoryWriter<'_> {
        HistoryWriter::new(self.conn, &self.context)
    }

    fn guarded<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.without_capture(f)
    }

    /// Load the key and confirm the history table exists before any write.
    fn prepare(&self, table: &str) -> Result<TableSchema> {
        let schema = TableSchema::load(self.conn, "main", table)?;
        let _ = self.writer().ensure_history_table(table)?;
        Ok(schema)
    }

    fn captured<T>(&self, table: &str, action: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let span = debug_span!("capture", table, action);
        let _entered = span.enter();
        let result = self.tx.scope(f);
        if let Err(err) = &result {
            warn!(table, action, error = %err, "capture rolled back");
            metrics::counter!("capture_rollbacks_total", "table" => table.to_string()).increment(1);
        }
        result
    }

    fn capture_direct(&self, table: &str, action: Action, keys: &KeySpec) -> Result<usize> {
        if !self.context.enabled() || !self.context.naming().is_tracked(table) {
            return Ok(0);
        }
        self.captured(table, action.as_str(), || {
            let _ = self.writer().ensure_history_table(table)?;
            let rows = self.resolver().resolve(table, keys)?;
            self.writer().record_all(table, &rows, action)
        })
    }

    fn insert_flow(
        &self,
        table: &str,
        row: Option<&Row>,
        mutate: impl FnOnce() -> Result<usize>,
    ) -> Result<usize> {
        let schema = self.prepare(table)?;
        if schema.is_composite() {
            return Err(HistoryError::configuration(
                table,
                "insert capture needs a single-column primary key",
            ));
        }
        let affected = self.guarded(mutate)?;
        match affected {
            0 => return Ok(0),
            1 => {}
            n => {
                return Err(HistoryError::validation(
                    table,
                    format!("insert capture expects one row, statement inserted {n}"),
                ));
            }
        }
        let rows = self.resolve_inserted(table, &schema, row)?;
        let _ = self.writer().record_all(table, &rows, Action::Insert)?;
        Ok(affected)
    }

    fn resolve_inserted(&self, table: &str, schema: &TableSchema, row: Option<&Row>) -> Result<Vec<Row>> {
        let key = &schema.primary_key[0];
        let keys = match row.and_then(|r| r.get(key)) {
            Some(value) if *value != Value::Null => KeySpec::single(key, value.clone()),
            _ => {
                let identity = schema.identity_column().ok_or_else(|| {
                    HistoryError::configuration(table, "no identity column to find the inserted row")
                })?;
                KeySpec::single(identity, self.conn.last_insert_rowid())
            }
        };
        let rows = self.resolver().resolve(table, &keys)?;
        if rows.is_empty() {
            return Err(HistoryError::configuration(
                table,
                format!("inserted row not found by {keys:?}"),
            ));
        }
        Ok(rows)
    }

    /// Re-read rows by key after an update and record them. Every key must
    /// come back as exactly one row.
    fn record_updated(&self, table: &str, primary_key: &[String], key_rows: &[Row]) -> Result<usize> {
        let rows = self.resolver().resolve_by_keys(table, primary_key, key_rows)?;
        if rows.len() != key_rows.len() {
            return Err(HistoryError::validation(
                table,
                format!(
                    "re-read {} rows after update, expected {}",
                    rows.len(),
                    key_rows.len()
                ),
            ));
        }
        self.writer().record_all(table, &rows, Action::Update)
    }

    fn upsert_flow(
        &self,
        table: &str,
        unique_keys: &KeySpec,
        row: Option<&Row>,
        mutate: impl FnOnce() -> Result<usize>,
    ) -> Result<usize> {
        let schema = self.prepare(table)?;
        let matches = self.resolver().resolve(table, unique_keys)?;
        match matches.as_slice() {
            [] => {
                debug!(table, "upsert matched no row, capturing as insert");
                self.insert_flow(table, row, mutate)
            }
            [existing] => {
                debug!(table, "upsert matched one row, capturing as update");
                let mut key_row = existing.project(&schema.primary_key);
                if let Some(row) = row {
                    for column in &schema.primary_key {
                        if let Some(value) = row.get(column) {
                            key_row.set(column, value.clone());
                        }
                    }
                }
                let affected = self.guarded(mutate)?;
                if affected == 0 {
                    return Ok(0);
                }
                let _ = self.record_updated(table, &schema.primary_key, &[key_row])?;
                Ok(affected)
            }
            many => Err(HistoryError::validation(
                table,
                format!("upsert key matched {} rows, expected at most one", many.len()),
            )),
        }
    }
}

impl TableWriter for HistoricalConnection<'_> {
    fn insert(&self, table: &str, row: &Row) -> Result<usize> {
        if !self.should_capture(table) {
            return self.direct().insert(table, row);
        }
        self.captured(table, "INSERT", || {
            self.insert_flow(table, Some(row), || self.insert(table, row))
        })
    }

    fn update(&self, table: &str, values: &Row, condition: &Condition) -> Result<usize> {
        if !self.should_capture(table) {
            return self.direct().update(table, values, condition);
        }
        self.captured(table, "UPDATE", || {
            let schema = self.prepare(table)?;
            let mut key_rows = self
                .resolver()
                .select_columns(table, &schema.primary_key, condition)?;
            if key_rows.is_empty() {
                debug!(table, "no rows matched, update skipped");
                return Ok(0);
            }
            let affected = self.guarded(|| self.update(table, values, condition))?;
            for key_row in &mut key_rows {
                for column in &schema.primary_key {
                    if let Some(value) = values.get(column) {
                        key_row.set(column, value.clone());
                    }
                }
            }
            let _ = self.record_updated(table, &schema.primary_key, &key_rows)?;
            Ok(affected)
        })
    }

    fn delete(&self, table: &str, condition: &Condition) -> Result<usize> {
        if !self.should_capture(table) {
            return self.direct().delete(table, condition);
        }
        self.captured(table, "DELETE", || {
            let _ = self.writer().ensure_history_table(table)?;
            let rows = self.resolver().select_where(table, condition)?;
            if rows.is_empty() {
                debug!(table, "no rows matched, delete skipped");
                return Ok(0);
            }
            let _ = self.writer().record_all(table, &rows, Action::Delete)?;
            self.guarded(|| self.delete(table, condition))
        })
    }

    fn upsert(&self, table: &str, row: &Row, unique: &[&str]) -> Result<usize> {
        if !self.should_capture(table) {
            return self.direct().upsert(table, row, unique);
        }
        self.captured(table, "UPSERT", || {
            let keys = KeySpec::from_row(table, unique, row)?;
            self.upsert_flow(table, &keys, Some(row), || self.upsert(table, row, unique))
        })
    }
}

impl std::fmt::Debug for HistoricalConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalConnection")
            .field("context", &self.context)
            .field("tx", &self.tx)
            .field("capturing", &self.capturing.get())
            .finish_non_exhaustive()
    }
}

/// Sets the capturing flag, restoring its previous value on drop.
struct CaptureGuard<'g> {
    flag: &'g Cell<bool>,
    previous: bool,
}

impl<'g> CaptureGuard<'g> {
    fn set(flag: &'g Cell<bool>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
