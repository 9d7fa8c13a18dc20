//! Catalog lookups.
//!
//! History tables may live in an attached schema, so every lookup here takes
//! the schema name explicitly. Tracked tables are always addressed
//! unqualified; history tables are always addressed as `"schema"."table"`.

use rusqlite::{Connection, OptionalExtension};

use crate::errors::{HistoryError, Result};

/// Quote an identifier for interpolation into SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// One row of `pragma_table_info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Ordinal position.
    pub cid: i64,
    /// Column name.
    pub name: String,
    /// Declared type as written (may be empty).
    pub decl_type: String,
    /// `NOT NULL` constraint present.
    pub not_null: bool,
    /// Default expression text.
    pub default: Option<String>,
    /// 1-based position within the primary key, 0 if not a key column.
    pub pk: u32,
}

/// Whether `schema` holds a table named exactly `table`.
pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote_ident(schema)
    );
    let count: i64 = conn.query_row(&sql, [table], |row| row.get(0))?;
    Ok(count > 0)
}

/// Columns of `schema.table` in declared order; empty if the table is absent.
pub fn table_columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        "SELECT cid, name, type, \"notnull\", dflt_value, pk \
         FROM pragma_table_info(?1, ?2) ORDER BY cid",
    )?;
    let rows = stmt.query_map([table, schema], |row| {
        Ok(ColumnInfo {
            cid: row.get(0)?,
            name: row.get(1)?,
            decl_type: row.get(2)?,
            not_null: row.get::<_, i64>(3)? != 0,
            default: row.get(4)?,
            pk: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Primary-key column names of `schema.table`, in key order.
pub fn primary_key(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
    let mut key: Vec<ColumnInfo> = table_columns(conn, schema, table)?
        .into_iter()
        .filter(|c| c.pk > 0)
        .collect();
    key.sort_by_key(|c| c.pk);
    Ok(key.into_iter().map(|c| c.name).collect())
}

/// The `CREATE TABLE` text stored for `schema.table`.
pub fn table_sql(conn: &Connection, schema: &str, table: &str) -> Result<Option<String>> {
    let sql = format!(
        "SELECT sql FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote_ident(schema)
    );
    Ok(conn
        .query_row(&sql, [table], |row| row.get::<_, Option<String>>(0))
        .optional()?
        .flatten())
}

/// Explicit (non-automatic) indexes on `schema.table` as `(name, sql)`.
pub fn index_sql(conn: &Connection, schema: &str, table: &str) -> Result<Vec<(String, String)>> {
    let sql = format!(
        "SELECT name, sql FROM {}.sqlite_master \
         WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
        quote_ident(schema)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Shape of a tracked table as the interceptor needs it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declared order.
    pub columns: Vec<ColumnInfo>,
    /// Primary-key columns in key order; never empty.
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Load from the catalog. A missing table or a table without a primary
    /// key is a configuration error.
    pub fn load(conn: &Connection, schema: &str, table: &str) -> Result<Self> {
        let columns = table_columns(conn, schema, table)?;
        if columns.is_empty() {
            return Err(HistoryError::configuration(
                table,
                format!("table not found in schema {schema}"),
            ));
        }
        let mut key: Vec<&ColumnInfo> = columns.iter().filter(|c| c.pk > 0).collect();
        if key.is_empty() {
            return Err(HistoryError::configuration(table, "table has no primary key"));
        }
        key.sort_by_key(|c| c.pk);
        let primary_key = key.into_iter().map(|c| c.name.clone()).collect();
        Ok(Self {
            name: table.to_string(),
            columns,
            primary_key,
        })
    }

    /// Whether the key spans more than one column.
    pub fn is_composite(&self) -> bool {
        self.primary_key.len() > 1
    }

    /// Column whose value `last_insert_rowid()` reports after an insert.
    ///
    /// An `INTEGER PRIMARY KEY` aliases the rowid. Any other single-column
    /// key falls back to the implicit `rowid`. Composite keys have none.
    pub fn identity_column(&self) -> Option<&str> {
        let [key] = self.primary_key.as_slice() else {
            return None;
        };
        let is_alias = self
            .columns
            .iter()
            .any(|c| &c.name == key && c.decl_type.eq_ignore_ascii_case("INTEGER"));
        Some(if is_alias { key.as_str() } else { "rowid" })
    }

    /// Column names in declared order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
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

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE p_orders (id INTEGER PRIMARY KEY, total REAL NOT NULL DEFAULT 0, note TEXT);
             CREATE INDEX idx_orders_total ON p_orders(total);
             CREATE TABLE p_lines (order_id INTEGER, line_no INTEGER, qty INTEGER,
                                   PRIMARY KEY (line_no, order_id));
             CREATE TABLE p_codes (code TEXT PRIMARY KEY, label TEXT);
             CREATE TABLE plain (x INTEGER);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_ident("p_orders"), "\"p_orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("history", "z_orders"), "\"history\".\"z_orders\"");
    }

    #[test]
    fn exists_is_exact() {
        let conn = setup();
        assert!(table_exists(&conn, "main", "p_orders").unwrap());
        assert!(!table_exists(&conn, "main", "p_order").unwrap());
        assert!(!table_exists(&conn, "main", "idx_orders_total").unwrap());
    }

    #[test]
    fn columns_in_declared_order() {
        let conn = setup();
        let cols = table_columns(&conn, "main", "p_orders").unwrap();
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "total", "note"]);
        assert!(cols[1].not_null);
        assert_eq!(cols[1].default.as_deref(), Some("0"));
        assert_eq!(cols[0].pk, 1);
    }

    #[test]
    fn composite_key_in_key_order() {
        let conn = setup();
        assert_eq!(
            primary_key(&conn, "main", "p_lines").unwrap(),
            vec!["line_no".to_string(), "order_id".to_string()]
        );
    }

    #[test]
    fn identity_columns() {
        let conn = setup();
        let orders = TableSchema::load(&conn, "main", "p_orders").unwrap();
        assert_eq!(orders.identity_column(), Some("id"));
        let codes = TableSchema::load(&conn, "main", "p_codes").unwrap();
        assert_eq!(codes.identity_column(), Some("rowid"));
        let lines = TableSchema::load(&conn, "main", "p_lines").unwrap();
        assert!(lines.is_composite());
        assert_eq!(lines.identity_column(), None);
    }

    #[test]
    fn load_rejects_missing_and_keyless() {
        let conn = setup();
        assert_matches!(
            TableSchema::load(&conn, "main", "p_missing"),
            Err(HistoryError::Configuration { .. })
        );
        assert_matches!(
            TableSchema::load(&conn, "main", "plain"),
            Err(HistoryError::Configuration { ref message, .. }) if message.contains("primary key")
        );
    }

    #[test]
    fn table_and_index_sql() {
        let conn = setup();
        let sql = table_sql(&conn, "main", "p_orders").unwrap().unwrap();
        assert!(sql.starts_with("CREATE TABLE p_orders"));
        assert_eq!(table_sql(&conn, "main", "nope").unwrap(), None);
        let indexes = index_sql(&conn, "main", "p_orders").unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].0, "idx_orders_total");
        // automatic index for the TEXT primary key has no sql
        assert!(index_sql(&conn, "main", "p_codes").unwrap().is_empty());
    }
}
