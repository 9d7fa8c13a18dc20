//! Column alteration by table rebuild.
//!
//! `SQLite` has no `ALTER COLUMN`. The table is recreated under a temporary
//! name with the new column definition, the data copied across, the old
//! table dropped, the new one renamed into place, and the explicit indexes
//! recreated. Column types, `NOT NULL`, defaults, the primary key,
//! `AUTOINCREMENT` and `WITHOUT ROWID` are carried over from the catalog;
//! `CHECK`, `REFERENCES` and triggers on the old table are not.
//!
//! Run with foreign key enforcement off (the migration runner does this) when
//! other tables reference the rebuilt one.

use rusqlite::Connection;
use tracing::debug;

use crate::errors::{HistoryError, Result};
use crate::sqlite::catalog::{self, ColumnInfo, qualified, quote_ident};

/// Rebuild `schema.table` with `column` redefined as `definition`.
pub fn rebuild_with_column(
    conn: &Connection,
    schema: &str,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    let columns = catalog::table_columns(conn, schema, table)?;
    if columns.is_empty() {
        return Err(HistoryError::configuration(
            table,
            format!("table not found in schema {schema}"),
        ));
    }
    let Some(target) = columns.iter().find(|c| c.name == column) else {
        return Err(HistoryError::configuration(
            table,
            format!("no column {column} to alter"),
        ));
    };
    if target.pk > 0 {
        return Err(HistoryError::configuration(
            table,
            format!("cannot alter primary key column {column}"),
        ));
    }

    let create_sql = catalog::table_sql(conn, schema, table)?
        .unwrap_or_default()
        .to_ascii_uppercase();
    let autoincrement = create_sql.contains("AUTOINCREMENT");
    let without_rowid = create_sql.contains("WITHOUT ROWID");
    let indexes = catalog::index_sql(conn, schema, table)?;

    let mut key: Vec<&ColumnInfo> = columns.iter().filter(|c| c.pk > 0).collect();
    key.sort_by_key(|c| c.pk);
    let inline_key = key.len() == 1;

    let mut body: Vec<String> = columns
        .iter()
        .map(|c| {
            if c.name == column {
                format!("{} {definition}", quote_ident(&c.name))
            } else {
                carried_definition(c, inline_key, autoincrement)
            }
        })
        .collect();
    if !inline_key {
        body.push(format!(
            "PRIMARY KEY ({})",
            key.iter().map(|c| quote_ident(&c.name)).collect::<Vec<_>>().join(", ")
        ));
    }

    let temp = format!("{table}__rebuild");
    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let statements = [
        format!(
            "CREATE TABLE {} ({}){}",
            qualified(schema, &temp),
            body.join(", "),
            if without_rowid { " WITHOUT ROWID" } else { "" }
        ),
        format!(
            "INSERT INTO {} ({names}) SELECT {names} FROM {}",
            qualified(schema, &temp),
            qualified(schema, table)
        ),
        format!("DROP TABLE {}", qualified(schema, table)),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified(schema, &temp),
            quote_ident(table)
        ),
    ];
    for sql in &statements {
        conn.execute_batch(sql)
            .map_err(HistoryError::datastore(table, "ALTER COLUMN"))?;
    }
    for (name, sql) in &indexes {
        conn.execute_batch(&qualify_index(sql, schema))
            .map_err(HistoryError::datastore(table, "CREATE INDEX"))?;
        debug!(table, index = %name, "index recreated");
    }
    debug!(table, schema, column, "table rebuilt");
    Ok(())
}

fn carried_definition(column: &ColumnInfo, inline_key: bool, autoincrement: bool) -> String {
    let mut def = quote_ident(&column.name);
    if !column.decl_type.is_empty() {
        def.push(' ');
        def.push_str(&column.decl_type);
    }
    if inline_key && column.pk > 0 {
        def.push_str(" PRIMARY KEY");
        if autoincrement {
            def.push_str(" AUTOINCREMENT");
        }
    }
    if column.not_null {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT ({default})"));
    }
    def
}

/// Put the index in `schema` (`CREATE INDEX "schema".name ON table ...`);
/// the table name in an index definition must stay unqualified.
fn qualify_index(sql: &str, schema: &str) -> String {
    if schema == "main" {
        return sql.to_string();
    }
    let upper = sql.to_ascii_uppercase();
    let Some(at) = upper.find("INDEX") else {
        return sql.to_string();
    };
    let mut name_at = at + "INDEX".len();
    let after = &upper[name_at..];
    let trimmed = after.trim_start();
    name_at += after.len() - trimmed.len();
    if trimmed.starts_with("IF NOT EXISTS") {
        name_at += "IF NOT EXISTS".len();
        let after = &upper[name_at..];
        name_at += after.len() - after.trim_start().len();
    }
    format!("{}{}.{}", &sql[..name_at], quote_ident(schema), &sql[name_at..])
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
