//! Version-tracked schema migrations with history mirroring.
//!
//! Each [`Migration`]'s `up` receives the [`SchemaMirror`], so tracked-table
//! DDL and its history counterpart are applied together. A migration runs in
//! one nested transaction scope with its `schema_version` row; a failure
//! rolls back both the tracked and the history DDL.
//!
//! Foreign key enforcement is switched off for the whole run (column
//! alteration rebuilds tables) and `PRAGMA foreign_key_check` must come back
//! clean before each migration commits. Running the migrator is idempotent:
//! already-applied versions are skipped.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::capture::HistoricalConnection;
use crate::errors::{HistoryError, Result};
use crate::schema::SchemaMirror;

/// Signature of a migration body.
pub type MigrationFn = fn(&SchemaMirror<'_, '_>) -> Result<()>;

/// A single migration with a version number and its body.
#[derive(Clone, Copy)]
pub struct Migration {
    /// Strictly increasing version.
    pub version: u32,
    /// Human-readable summary stored in `schema_version`.
    pub description: &'static str,
    /// Applies the change.
    pub up: MigrationFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Run all pending `migrations` in version order.
///
/// Must be called outside any open transaction. Returns how many migrations
/// were applied.
///
/// # Errors
///
/// Returns [`HistoryError::Migration`] if a migration fails, the versions are
/// not strictly increasing, or the foreign key check finds violations.
pub fn run_migrations(hc: &HistoricalConnection<'_>, migrations: &[Migration]) -> Result<u32> {
    if hc.transaction().depth() > 0 {
        return Err(HistoryError::Migration {
            message: "migrations must run outside an open transaction".into(),
        });
    }
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version >= w[1].version) {
        return Err(HistoryError::Migration {
            message: format!(
                "migration versions not strictly increasing: v{} then v{}",
                pair[0].version, pair[1].version
            ),
        });
    }

    let conn = hc.connection();
    ensure_version_table(conn)?;
    let current = current_version(conn)?;

    let fk_enabled: bool = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)?;
    conn.execute_batch("PRAGMA foreign_keys = OFF")?;
    let outcome = apply_pending(hc, migrations, current);
    if fk_enabled {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
    }
    let applied = outcome?;

    if applied > 0 {
        info!(applied, "migrations complete");
    }
    Ok(applied)
}

/// Return the highest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| HistoryError::Migration {
            message: format!("failed to read schema_version: {e}"),
        })?;
    Ok(version)
}

/// Return the latest version in `migrations`.
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |m| m.version)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| HistoryError::Migration {
        message: format!("failed to create schema_version table: {e}"),
    })?;
    Ok(())
}

fn apply_pending(hc: &HistoricalConnection<'_>, migrations: &[Migration], current: u32) -> Result<u32> {
    let mut applied = 0;
    for migration in migrations {
        if migration.version <= current {
            debug!(
                version = migration.version,
                description = migration.description,
                "migration already applied, skipping"
            );
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply_migration(hc, migration)?;
        applied += 1;
    }
    Ok(applied)
}

fn apply_migration(hc: &HistoricalConnection<'_>, migration: &Migration) -> Result<()> {
    let conn = hc.connection();
    hc.transaction_scope(|| {
        (migration.up)(&hc.schema()).map_err(|e| HistoryError::Migration {
            message: format!(
                "migration v{} ({}) failed: {e}",
                migration.version, migration.description
            ),
        })?;

        let _ = conn
            .execute(
                "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, datetime('now'), ?2)",
                rusqlite::params![migration.version, migration.description],
            )
            .map_err(|e| HistoryError::Migration {
                message: format!("failed to record v{} in schema_version: {e}", migration.version),
            })?;

        let violations = foreign_key_violations(conn)?;
        if violations > 0 {
            return Err(HistoryError::Migration {
                message: format!(
                    "migration v{} left {violations} foreign key violations",
                    migration.version
                ),
            });
        }
        Ok(())
    })
}

fn foreign_key_violations(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while rows.next()?.is_some() {
        count += 1;
    }
    Ok(count)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::context::HistoryContext;
    use crate::schema::ColumnSpec;
    use crate::sqlite::catalog;
    use assert_matches::assert_matches;

    fn create_orders(mirror: &SchemaMirror<'_, '_>) -> Result<()> {
        mirror.create_table(
            "p_orders",
            &[
                ColumnSpec::new("id", "pk"),
                ColumnSpec::new("total", "INTEGER NOT NULL DEFAULT 0"),
            ],
            "",
            false,
        )
    }

    fn add_note(mirror: &SchemaMirror<'_, '_>) -> Result<()> {
        mirror.add_column("p_orders", &ColumnSpec::new("note", "TEXT"))?;
        Ok(())
    }

    fn broken(mirror: &SchemaMirror<'_, '_>) -> Result<()> {
        mirror.add_column("p_orders", &ColumnSpec::new("flag", "INTEGER"))?;
        mirror.add_column("p_missing", &ColumnSpec::new("x", "INTEGER"))?;
        Ok(())
    }

    const MIGRATIONS: &[Migration] = &[
        Migration {
            version: 1,
            description: "orders",
            up: create_orders,
        },
        Migration {
            version: 2,
            description: "order notes",
            up: add_note,
        },
    ];

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        conn
    }

    #[test]
    fn applies_pending_then_skips() {
        let conn = open();
        let hc = HistoricalConnection::new(&conn, HistoryContext::default());
        assert_eq!(run_migrations(&hc, MIGRATIONS).unwrap(), 2);
        assert_eq!(current_version(&conn).unwrap(), 2);
        assert_eq!(latest_version(MIGRATIONS), 2);
        assert!(catalog::table_columns(&conn, "main", "z_orders")
            .unwrap()
            .iter()
            .any(|c| c.name == "note"));

        assert_eq!(run_migrations(&hc, MIGRATIONS).unwrap(), 0);
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn failed_migration_rolls_back_tracked_and_history_ddl() {
        let conn = open();
        let hc = HistoricalConnection::new(&conn, HistoryContext::default());
        run_migrations(&hc, &MIGRATIONS[..1]).unwrap();

        let bad = [
            MIGRATIONS[0],
            Migration {
                version: 2,
                description: "broken",
                up: broken,
            },
        ];
        let err = run_migrations(&hc, &bad).unwrap_err();
        assert_matches!(err, HistoryError::Migration { .. });
        assert_eq!(current_version(&conn).unwrap(), 1);
        for table in ["p_orders", "z_orders"] {
            assert!(!catalog::table_columns(&conn, "main", table)
                .unwrap()
                .iter()
                .any(|c| c.name == "flag"));
        }
        assert_eq!(hc.transaction().depth(), 0);
    }

    #[test]
    fn rejects_unordered_versions() {
        let conn = open();
        let hc = HistoricalConnection::new(&conn, HistoryContext::default());
        let unordered = [MIGRATIONS[1], MIGRATIONS[0]];
        assert_matches!(
            run_migrations(&hc, &unordered),
            Err(HistoryError::Migration { .. })
        );
    }

    #[test]
    fn refuses_to_run_inside_transaction() {
        let conn = open();
        let hc = HistoricalConnection::new(&conn, HistoryContext::default());
        hc.transaction().begin().unwrap();
        assert_matches!(
            run_migrations(&hc, MIGRATIONS),
            Err(HistoryError::Migration { .. })
        );
        hc.transaction().rollback().unwrap();
    }
}
