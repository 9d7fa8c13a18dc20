//! The schema mirror.
//!
//! Every structural change to a tracked table is replayed onto its history
//! table inside the same transaction scope:
//!
//! - create table: the history table is derived from the column list
//!   (relaxed types, synthesized history key, bookkeeping columns);
//! - rename / add / alter / rename column: applied to the history table too;
//! - drop table / drop column: history is kept unless `drop_history` is set
//!   or the explicit `drop_history_*` operations are used.
//!
//! A tracked table whose history table is missing is reported with a warning
//! and its history step skipped; the operation then returns `false`. With
//! capture disabled no history DDL runs.

use tracing::{debug, info, warn};

use super::column::{self, ColumnSpec, KeyDeclaration};
use super::rebuild;
use crate::capture::HistoricalConnection;
use crate::errors::{HistoryError, Result};
use crate::sqlite::catalog::{self, TableSchema, qualified, quote_ident};
use crate::types::Action;

/// DDL surface that keeps history tables in step with tracked tables.
pub struct SchemaMirror<'a, 'c> {
    hc: &'a HistoricalConnection<'c>,
}

impl<'a, 'c> SchemaMirror<'a, 'c> {
    pub(crate) fn new(hc: &'a HistoricalConnection<'c>) -> Self {
        Self { hc }
    }

    /// Create `table` and, when it is tracked and `skip_history` is false,
    /// its history table.
    ///
    /// `options` is appended after the column list (e.g. `WITHOUT ROWID`);
    /// the history table never gets it. The key and the history table name
    /// are validated before any DDL runs.
    pub fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        options: &str,
        skip_history: bool,
    ) -> Result<()> {
        let mirror = self.mirroring(table) && !skip_history;
        let key = if mirror {
            let key = table_key(table, columns)?;
            self.ensure_history_absent(table)?;
            Some(key)
        } else {
            None
        };

        let body = columns
            .iter()
            .map(|spec| {
                if spec.is_constraint() {
                    spec.definition.clone()
                } else {
                    format!("{} {}", quote_ident(&spec.name), column::expand_definition(&spec.definition))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let options = if options.trim().is_empty() {
            String::new()
        } else {
            format!(" {}", options.trim())
        };
        let sql = format!("CREATE TABLE {} ({body}){options}", quote_ident(table));

        self.hc.transaction_scope(|| {
            self.exec(table, "CREATE TABLE", &sql)?;
            if let Some(key) = &key {
                let history_columns: Vec<(String, String)> = columns
                    .iter()
                    .filter(|spec| !spec.is_constraint())
                    .map(|spec| (spec.name.clone(), column::history_definition(&spec.definition)))
                    .collect();
                self.create_history(table, key, &history_columns)?;
            }
            Ok(())
        })
    }

    /// Create the history table for an existing tracked table from its
    /// live catalog entry. Fails if the history table already exists.
    pub fn create_history_table(&self, table: &str) -> Result<()> {
        if !self.hc.context().naming().is_tracked(table) {
            return Err(HistoryError::configuration(table, "table is not tracked"));
        }
        let schema = TableSchema::load(self.hc.connection(), "main", table)?;
        self.ensure_history_absent(table)?;
        let history_columns: Vec<(String, String)> = schema
            .columns
            .iter()
            .map(|c| (c.name.clone(), column::history_definition(&c.decl_type)))
            .collect();
        self.hc
            .transaction_scope(|| self.create_history(table, &schema.primary_key, &history_columns))
    }

    /// Rename `from` to `to`, renaming its history table alongside when both
    /// names are tracked. Returns whether the history table was renamed.
    pub fn rename_table(&self, from: &str, to: &str) -> Result<bool> {
        let naming = self.hc.context().naming();
        let target = match (self.existing_history(from)?, naming.history_table(to)) {
            (Some(history_from), Some(history_to)) => {
                if catalog::table_exists(self.hc.connection(), self.schema(), &history_to)? {
                    return Err(HistoryError::configuration(
                        to,
                        format!("history table {history_to} already exists"),
                    ));
                }
                Some((history_from, history_to))
            }
            (Some(history_from), None) => {
                warn!(table = from, to, history = %history_from, "renamed to an untracked name, history table left in place");
                None
            }
            (None, _) => None,
        };

        self.hc.transaction_scope(|| {
            self.exec(
                from,
                "RENAME TABLE",
                &format!("ALTER TABLE {} RENAME TO {}", quote_ident(from), quote_ident(to)),
            )?;
            if let Some((history_from, history_to)) = &target {
                self.exec_history(
                    from,
                    "RENAME TABLE",
                    &format!(
                        "ALTER TABLE {} RENAME TO {}",
                        qualified(self.schema(), history_from),
                        quote_ident(history_to)
                    ),
                )?;
            }
            Ok(target.is_some())
        })
    }

    /// Drop `table`. Its history table is only dropped when `drop_history`;
    /// returns whether it was.
    pub fn drop_table(&self, table: &str, drop_history: bool) -> Result<bool> {
        let history = if drop_history { self.existing_history(table)? } else { None };
        self.hc.transaction_scope(|| {
            self.exec(table, "DROP TABLE", &format!("DROP TABLE {}", quote_ident(table)))?;
            if let Some(history) = &history {
                self.exec_history(
                    table,
                    "DROP TABLE",
                    &format!("DROP TABLE {}", qualified(self.schema(), history)),
                )?;
            }
            Ok(history.is_some())
        })
    }

    /// Drop the history table of `table`. Fails if it does not exist.
    pub fn drop_history_table(&self, table: &str) -> Result<()> {
        let history = self.required_history(table)?;
        self.hc.transaction_scope(|| {
            self.exec_history(
                table,
                "DROP TABLE",
                &format!("DROP TABLE {}", qualified(self.schema(), &history)),
            )
        })
    }

    /// Add `column` to `table` and its relaxed form to the history table.
    ///
    /// A history column of the same name (left behind by an earlier drop)
    /// is reused. Returns `false` when there is no history table to mirror
    /// onto.
    pub fn add_column(&self, table: &str, column: &ColumnSpec) -> Result<bool> {
        let history = self.existing_history(table)?;
        let history_has = match &history {
            Some(h) => self.history_has_column(h, &column.name)?,
            None => false,
        };
        self.hc.transaction_scope(|| {
            self.exec(
                table,
                "ADD COLUMN",
                &format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(table),
                    quote_ident(&column.name),
                    column::expand_definition(&column.definition)
                ),
            )?;
            match &history {
                Some(h) if history_has => {
                    debug!(table, column = %column.name, history = %h, "history column already present");
                }
                Some(h) => self.exec_history(
                    table,
                    "ADD COLUMN",
                    &format!(
                        "ALTER TABLE {} ADD COLUMN {} {}",
                        qualified(self.schema(), h),
                        quote_ident(&column.name),
                        column::history_definition(&column.definition)
                    ),
                )?,
                None => {}
            }
            Ok(history.is_some())
        })
    }

    /// Redefine `column` of `table` and mirror its relaxed form.
    ///
    /// Primary-key columns cannot be altered. Returns whether the history
    /// column was altered too.
    pub fn alter_column(&self, table: &str, column: &str, definition: &str) -> Result<bool> {
        let schema = TableSchema::load(self.hc.connection(), "main", table)?;
        if schema.primary_key.iter().any(|k| k == column) {
            return Err(HistoryError::configuration(
                table,
                format!("cannot alter primary key column {column}"),
            ));
        }
        let history = match self.existing_history(table)? {
            Some(h) if self.history_has_column(&h, column)? => Some(h),
            Some(h) => {
                warn!(table, column, history = %h, "history table lacks column, alter not mirrored");
                None
            }
            None => None,
        };
        self.hc.transaction_scope(|| {
            rebuild::rebuild_with_column(self.hc.connection(), "main", table, column, definition)?;
            info!(table, column, "column altered");
            if let Some(h) = &history {
                rebuild::rebuild_with_column(
                    self.hc.connection(),
                    self.schema(),
                    h,
                    column,
                    &column::history_definition(definition),
                )?;
                info!(table, column, history = %h, "history column altered");
            }
            Ok(history.is_some())
        })
    }

    /// Rename `from` to `to` in `table` and its history table. Returns
    /// whether the history column was renamed.
    pub fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<bool> {
        let history = match self.existing_history(table)? {
            Some(h) if self.history_has_column(&h, to)? => {
                return Err(HistoryError::configuration(
                    table,
                    format!("history table {h} already has a column {to}"),
                ));
            }
            Some(h) if self.history_has_column(&h, from)? => Some(h),
            Some(h) => {
                warn!(table, column = from, history = %h, "history table lacks column, rename not mirrored");
                None
            }
            None => None,
        };
        self.hc.transaction_scope(|| {
            self.exec(
                table,
                "RENAME COLUMN",
                &format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    quote_ident(table),
                    quote_ident(from),
                    quote_ident(to)
                ),
            )?;
            if let Some(h) = &history {
                self.exec_history(
                    table,
                    "RENAME COLUMN",
                    &format!(
                        "ALTER TABLE {} RENAME COLUMN {} TO {}",
                        qualified(self.schema(), h),
                        quote_ident(from),
                        quote_ident(to)
                    ),
                )?;
            }
            Ok(history.is_some())
        })
    }

    /// Drop `column` from `table`. The history column is only dropped when
    /// `drop_history`; returns whether it was.
    pub fn drop_column(&self, table: &str, column: &str, drop_history: bool) -> Result<bool> {
        let history = if drop_history {
            match self.existing_history(table)? {
                Some(h) if self.history_has_column(&h, column)? => Some(h),
                _ => None,
            }
        } else {
            None
        };
        self.hc.transaction_scope(|| {
            self.exec(
                table,
                "DROP COLUMN",
                &format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    quote_ident(table),
                    quote_ident(column)
                ),
            )?;
            if let Some(h) = &history {
                self.drop_history_column_sql(table, h, column)?;
            }
            Ok(history.is_some())
        })
    }

    /// Drop `column` from the history table of `table` only.
    pub fn drop_history_column(&self, table: &str, column: &str) -> Result<()> {
        let history = self.required_history(table)?;
        if !self.history_has_column(&history, column)? {
            return Err(HistoryError::configuration(
                table,
                format!("history table {history} has no column {column}"),
            ));
        }
        self.hc
            .transaction_scope(|| self.drop_history_column_sql(table, &history, column))
    }

    /// Whether `table` has a history table in the catalog.
    pub fn history_table_exists(&self, table: &str) -> Result<bool> {
        match self.hc.context().naming().history_table(table) {
            Some(history) => catalog::table_exists(self.hc.connection(), self.schema(), &history),
            None => Ok(false),
        }
    }

    // ─── Internal ───────────────────────────────────────────────────────────

    fn schema(&self) -> &str {
        self.hc.context().history_schema()
    }

    fn mirroring(&self, table: &str) -> bool {
        let context = self.hc.context();
        context.enabled() && context.naming().is_tracked(table)
    }

    /// History table of `table` when mirroring applies and it exists; warns
    /// when a tracked table has none.
    fn existing_history(&self, table: &str) -> Result<Option<String>> {
        if !self.mirroring(table) {
            return Ok(None);
        }
        let Some(history) = self.hc.context().naming().history_table(table) else {
            return Ok(None);
        };
        if catalog::table_exists(self.hc.connection(), self.schema(), &history)? {
            Ok(Some(history))
        } else {
            warn!(table, history = %history, schema = self.schema(), "no history table, skipping history step");
            Ok(None)
        }
    }

    fn required_history(&self, table: &str) -> Result<String> {
        let history = self
            .hc
            .context()
            .naming()
            .history_table(table)
            .ok_or_else(|| HistoryError::configuration(table, "table is not tracked"))?;
        if !catalog::table_exists(self.hc.connection(), self.schema(), &history)? {
            return Err(HistoryError::configuration(
                table,
                format!("history table {}.{history} does not exist", self.schema()),
            ));
        }
        Ok(history)
    }

    fn ensure_history_absent(&self, table: &str) -> Result<()> {
        if self.history_table_exists(table)? {
            return Err(HistoryError::configuration(
                table,
                "history table already exists",
            ));
        }
        Ok(())
    }

    fn history_has_column(&self, history: &str, column: &str) -> Result<bool> {
        Ok(catalog::table_columns(self.hc.connection(), self.schema(), history)?
            .iter()
            .any(|c| c.name == column))
    }

    fn create_history(&self, table: &str, key: &[String], columns: &[(String, String)]) -> Result<()> {
        let context = self.hc.context();
        let history = context
            .naming()
            .history_table(table)
            .ok_or_else(|| HistoryError::configuration(table, "table is not tracked"))?;
        let history_key = context.naming().history_key(key);
        let bookkeeping = context.columns();
        if let Some((clash, _)) = columns
            .iter()
            .find(|(name, _)| *name == history_key || context.is_bookkeeping(name))
        {
            return Err(HistoryError::configuration(
                table,
                format!("column {clash} collides with a generated column of {history}"),
            ));
        }

        let actions = Action::ALL
            .iter()
            .map(|a| format!("'{a}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut body = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(&history_key))];
        body.extend(
            columns
                .iter()
                .map(|(name, def)| format!("{} {def}", quote_ident(name))),
        );
        body.push(format!("{} INTEGER DEFAULT NULL", quote_ident(&bookkeeping.actor)));
        body.push(format!(
            "{0} TEXT NOT NULL DEFAULT 'INSERT' CHECK ({0} IN ({actions}))",
            quote_ident(&bookkeeping.action)
        ));
        body.push(format!(
            "{} TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
            quote_ident(&bookkeeping.recorded_at)
        ));

        self.exec_history(
            table,
            "CREATE TABLE",
            &format!(
                "CREATE TABLE {} ({})",
                qualified(self.schema(), &history),
                body.join(", ")
            ),
        )
    }

    fn drop_history_column_sql(&self, table: &str, history: &str, column: &str) -> Result<()> {
        self.exec_history(
            table,
            "DROP COLUMN",
            &format!(
                "ALTER TABLE {} DROP COLUMN {}",
                qualified(self.schema(), history),
                quote_ident(column)
            ),
        )
    }

    fn exec(&self, table: &str, verb: &str, sql: &str) -> Result<()> {
        self.hc
            .connection()
            .execute_batch(sql)
            .map_err(HistoryError::datastore(table, verb))?;
        info!(table, ddl = verb, "schema changed");
        Ok(())
    }

    fn exec_history(&self, table: &str, verb: &str, sql: &str) -> Result<()> {
        self.hc
            .connection()
            .execute_batch(sql)
            .map_err(HistoryError::datastore(table, verb))?;
        info!(table, ddl = verb, schema = self.schema(), "history schema mirrored");
        Ok(())
    }
}

impl std::fmt::Debug for SchemaMirror<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaMirror").finish_non_exhaustive()
    }
}

/// The primary key declared by `columns`; exactly one declaration required.
fn table_key(table: &str, columns: &[ColumnSpec]) -> Result<Vec<String>> {
    let mut found: Vec<Vec<String>> = Vec::new();
    for spec in columns {
        match column::key_declaration(table, spec)? {
            KeyDeclaration::None => {}
            KeyDeclaration::Inline => found.push(vec![spec.name.clone()]),
            KeyDeclaration::Table(cols) => found.push(cols),
        }
    }
    match found.len() {
        0 => Err(HistoryError::configuration(table, "no primary key declared")),
        1 => Ok(found.remove(0)),
        n => Err(HistoryError::configuration(
            table,
            format!("{n} primary key declarations, expected one"),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
