//! # histdb
//!
//! Transactional change capture ("historization") over `SQLite`.
//!
//! Every insert, update, delete and upsert against a tracked table appends one
//! row per affected row to a parallel history table, in the same transaction
//! as the business write. Schema changes to tracked tables are mirrored onto
//! their history tables.
//!
//! - **Nested transactions** ([`transaction`]): depth-counted begin/commit/rollback
//!   over one connection, with `LEVEL{n}` savepoints for inner levels
//! - **Row resolver** ([`resolver`]): turns a [`KeySpec`] into the rows it matches
//! - **History writer** ([`writer`]): one history INSERT per captured row
//! - **Capture interceptor** ([`capture`]): [`HistoricalConnection`] wraps the four
//!   mutating operations of [`TableWriter`] with resolve/mutate/record
//! - **Schema mirror** ([`schema`]): DDL replayed onto history tables
//! - **Migrations** ([`migrations`]): version-tracked runner built on the mirror
//! - **`SQLite` backend** ([`sqlite`]): pool, pragmas, history ATTACH, catalog lookups
//!
//! Configuration is injected through [`HistoryContext`]; nothing is read from
//! process-wide state.

#![deny(unsafe_code)]

pub mod actor;
pub mod capture;
pub mod command;
pub mod context;
pub mod errors;
pub mod history;
pub mod logging;
pub mod migrations;
pub mod naming;
pub mod resolver;
pub mod schema;
pub mod sqlite;
pub mod transaction;
pub mod types;
pub mod writer;

pub use actor::{ActorSource, FixedActor, FnActor};
pub use capture::HistoricalConnection;
pub use command::{DirectWriter, TableWriter};
pub use context::HistoryContext;
pub use errors::{HistoryError, Result};
pub use history::{HistoryRecord, count_actions, read_history};
pub use migrations::{Migration, current_version, latest_version, run_migrations};
pub use naming::{NamingPolicy, PrefixNaming};
pub use resolver::RowResolver;
pub use schema::{ColumnSpec, SchemaMirror};
pub use sqlite::Datastore;
pub use transaction::{NestedTransaction, TransactionControl};
pub use types::{Action, Condition, KeySpec, KeyValue, Row, Statement, Value};
pub use writer::HistoryWriter;
