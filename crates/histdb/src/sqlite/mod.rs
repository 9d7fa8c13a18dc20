//! `SQLite` backend for the change-capture engine.
//!
//! - **[`connection`]**: `r2d2` connection pool with WAL mode, foreign keys,
//!   performance pragmas, and the optional history database ATTACHed to every
//!   connection.
//! - **[`catalog`]**: identifier quoting and `sqlite_master` /
//!   `pragma_table_info` lookups used to find keys and history tables.
//!
//! The engine never owns a connection. Anything that can lend a
//! `&rusqlite::Connection` implements [`Datastore`].

pub mod catalog;
pub mod connection;

pub use catalog::{ColumnInfo, TableSchema, qualified, quote_ident};
pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, attach_history, new_file,
    new_in_memory, verify_pragmas,
};

use rusqlite::Connection;

/// Capability to lend a `SQLite` connection to the engine.
pub trait Datastore {
    /// The underlying connection.
    fn connection(&self) -> &Connection;
}

impl Datastore for Connection {
    fn connection(&self) -> &Connection {
        self
    }
}

impl Datastore for PooledConnection {
    fn connection(&self) -> &Connection {
        self
    }
}
