#![allow(missing_docs, unused_results)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use assert_matches::assert_matches;
use tempfile::TempDir;

use histdb::sqlite::{ConnectionConfig, ConnectionPool, new_file, verify_pragmas};
use histdb::{
    Action, ColumnSpec, Condition, FixedActor, FnActor, HistoricalConnection, HistoryContext, HistoryError,
    Migration, Result, Row, SchemaMirror, TableWriter, Value, current_version, latest_version,
    read_history, run_migrations,
};

fn create_accounts(mirror: &SchemaMirror<'_, '_>) -> Result<()> {
    mirror.create_table(
        "p_accounts",
        &[
            ColumnSpec::new("id", "pk"),
            ColumnSpec::new("name", "TEXT NOT NULL"),
            ColumnSpec::new("balance", "INTEGER NOT NULL DEFAULT 0"),
        ],
        "",
        false,
    )
}

fn add_email(mirror: &SchemaMirror<'_, '_>) -> Result<()> {
    mirror.add_column("p_accounts", &ColumnSpec::new("email", "TEXT"))?;
    Ok(())
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create accounts",
        up: create_accounts,
    },
    Migration {
        version: 2,
        description: "add account email",
        up: add_email,
    },
];

struct Fixture {
    _dir: TempDir,
    pool: ConnectionPool,
    context: HistoryContext,
    actor: Arc<AtomicI64>,
}

fn write_settings(dir: &Path) -> std::path::PathBuf {
    let settings = serde_json::json!({
        "naming": { "trackedPrefix": "p_", "historyPrefix": "z_" },
        "database": {
            "path": dir.join("app.db").to_string_lossy(),
            "historyPath": dir.join("history.db").to_string_lossy(),
            "poolSize": 2
        }
    });
    let path = dir.join("settings.json");
    std::fs::write(&path, settings.to_string()).unwrap();
    path
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let settings = histdb_settings::load_settings_from_path(&write_settings(dir.path())).unwrap();

    let actor = Arc::new(AtomicI64::new(10));
    let seen = Arc::clone(&actor);
    let context = HistoryContext::from_settings(
        &settings,
        Arc::new(FnActor(move || Some(seen.load(Ordering::SeqCst)))),
    )
    .unwrap();
    let pool = new_file(
        &settings.database.path,
        &ConnectionConfig::from_settings(&settings.database),
    )
    .unwrap();

    let conn = pool.get().unwrap();
    let hc = HistoricalConnection::new(&conn, context.clone());
    assert_eq!(run_migrations(&hc, MIGRATIONS).unwrap(), 2);

    Fixture {
        _dir: dir,
        pool,
        context,
        actor,
    }
}

fn tables_in(conn: &rusqlite::Connection, schema: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT name FROM \"{schema}\".sqlite_master WHERE type = 'table' ORDER BY name"
        ))
        .unwrap();
    stmt.query_map([], |r| r.get(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap()
}

#[test]
fn history_schema_is_attached_on_every_connection() {
    let fx = fixture();
    assert_eq!(fx.context.history_schema(), "history");

    let first = fx.pool.get().unwrap();
    let second = fx.pool.get().unwrap();
    for conn in [&first, &second] {
        let state = verify_pragmas(conn).unwrap();
        assert_eq!(state.journal_mode, "wal");
        assert!(state.foreign_keys_enabled);
        assert!(state.databases.contains(&"history".to_string()));
    }
}

#[test]
fn migrations_mirror_into_history_file() {
    let fx = fixture();
    let conn = fx.pool.get().unwrap();

    assert_eq!(current_version(&conn).unwrap(), latest_version(MIGRATIONS));
    let main_tables = tables_in(&conn, "main");
    assert!(main_tables.contains(&"p_accounts".to_string()));
    assert!(!main_tables.contains(&"z_accounts".to_string()));
    assert!(tables_in(&conn, "history").contains(&"z_accounts".to_string()));

    let has_email: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('z_accounts', 'history') WHERE name = 'email'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(has_email, 1);

    let hc = HistoricalConnection::new(&conn, fx.context.clone());
    assert_eq!(run_migrations(&hc, MIGRATIONS).unwrap(), 0);
}

#[test]
fn writes_land_in_history_file_with_actor() {
    let fx = fixture();
    let conn = fx.pool.get().unwrap();
    let hc = HistoricalConnection::new(&conn, fx.context.clone());

    hc.insert(
        "p_accounts",
        &Row::new().with("name", "ada".to_string()).with("balance", 5),
    )
    .unwrap();
    fx.actor.store(11, Ordering::SeqCst);
    hc.update(
        "p_accounts",
        &Row::new().with("email", "ada@example.org".to_string()),
        &Condition::eq("name", "ada".to_string()),
    )
    .unwrap();

    // a second connection reads through its own ATTACH
    let other = fx.pool.get().unwrap();
    let records = read_history(&other, &fx.context, "p_accounts").unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].action, Action::Insert);
    assert_eq!(records[0].actor, Some(10));
    assert_eq!(records[0].values.get("email"), Some(&Value::Null));
    assert_eq!(records[1].action, Action::Update);
    assert_eq!(records[1].actor, Some(11));
    assert_eq!(
        records[1].values.get("email"),
        Some(&Value::Text("ada@example.org".into()))
    );
}

#[test]
fn failed_history_write_rolls_back_both_files() {
    let fx = fixture();
    let conn = fx.pool.get().unwrap();
    let hc = HistoricalConnection::new(&conn, fx.context.clone());
    hc.insert(
        "p_accounts",
        &Row::new().with("id", 1).with("name", "bob".to_string()),
    )
    .unwrap();
    conn.execute_batch(
        "CREATE TRIGGER history.z_accounts_no_overdraft BEFORE INSERT ON z_accounts
         WHEN NEW.balance < 0 BEGIN SELECT RAISE(ABORT, 'overdraft in history'); END;",
    )
    .unwrap();

    let err = hc
        .update(
            "p_accounts",
            &Row::new().with("balance", -5),
            &Condition::eq("id", 1),
        )
        .unwrap_err();
    assert_matches!(err, HistoryError::Datastore { .. });

    let balance: i64 = conn
        .query_row("SELECT balance FROM p_accounts WHERE id = 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(balance, 0);
    let history_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM history.z_accounts", [], |r| r.get(0))
        .unwrap();
    assert_eq!(history_rows, 1);
    assert_eq!(hc.transaction().depth(), 0);
}

#[test]
fn disabled_settings_pass_writes_through() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{ "enabled": false }"#).unwrap();
    let settings = histdb_settings::load_settings_from_path(&path).unwrap();
    let context = HistoryContext::from_settings(&settings, Arc::new(FixedActor(None))).unwrap();
    assert!(!context.enabled());

    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let hc = HistoricalConnection::new(&conn, context);
    create_accounts(&hc.schema()).unwrap();
    assert!(!hc.schema().history_table_exists("p_accounts").unwrap());
    assert_eq!(
        hc.insert("p_accounts", &Row::new().with("name", "eve".to_string()))
            .unwrap(),
        1
    );
}
