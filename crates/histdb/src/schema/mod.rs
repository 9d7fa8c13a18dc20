//! Schema operations mirrored onto history tables.
//!
//! - **[`mirror`]**: [`SchemaMirror`], the DDL surface used by migrations.
//! - **[`column`]**: column specs and the relaxed history column form.
//! - **[`rebuild`]**: `ALTER COLUMN` emulation by table rebuild.

pub mod column;
pub mod mirror;
pub mod rebuild;

pub use column::{ColumnSpec, KeyDeclaration, PK_TYPE, history_definition};
pub use mirror::SchemaMirror;
