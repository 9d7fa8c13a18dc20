//! Error types for the change-capture engine.
//!
//! [`HistoryError`] is returned by every engine operation. The first four
//! variants are the engine's own failure kinds; the rest wrap lower layers
//! where no table context is available.

use thiserror::Error;

/// Errors that can occur while capturing, resolving, or mirroring.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The schema or naming setup cannot support the operation: missing
    /// history table, missing or ambiguous primary key, untracked name.
    #[error("configuration error on {table}: {message}")]
    Configuration {
        /// Table the operation targeted.
        table: String,
        /// What is wrong.
        message: String,
    },

    /// The caller's input is malformed: bad key specification, non-numeric
    /// membership value, ambiguous upsert match.
    #[error("validation error on {table}: {message}")]
    Validation {
        /// Table the operation targeted.
        table: String,
        /// What is wrong.
        message: String,
    },

    /// Nested transaction misuse or a failed BEGIN/COMMIT/ROLLBACK.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The datastore rejected a statement issued on behalf of `action`.
    #[error("{action} on {table} failed: {source}")]
    Datastore {
        /// Table the statement targeted.
        table: String,
        /// Attempted action (`INSERT`, `UPDATE`, `DELETE`, `SELECT`, DDL verb).
        action: String,
        /// Underlying `SQLite` error.
        #[source]
        source: rusqlite::Error,
    },

    /// `SQLite` error outside a table-scoped statement (catalog reads, pragmas).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },
}

impl HistoryError {
    pub(crate) fn configuration(table: &str, message: impl Into<String>) -> Self {
        Self::Configuration {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn validation(table: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// Builds a `map_err` adapter tagging a `SQLite` error with its table and action.
    pub(crate) fn datastore(table: &str, action: &str) -> impl FnOnce(rusqlite::Error) -> Self {
        let table = table.to_string();
        let action = action.to_string();
        move |source| Self::Datastore {
            table,
            action,
            source,
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, HistoryError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_display_names_table() {
        let err = HistoryError::configuration("p_orders", "no history table z_orders");
        assert_eq!(
            err.to_string(),
            "configuration error on p_orders: no history table z_orders"
        );
    }

    #[test]
    fn validation_display_names_table() {
        let err = HistoryError::validation("p_orders", "empty membership list for id");
        assert_eq!(
            err.to_string(),
            "validation error on p_orders: empty membership list for id"
        );
    }

    #[test]
    fn datastore_display_includes_action() {
        let err = HistoryError::datastore("p_orders", "UPDATE")(
            rusqlite::Error::QueryReturnedNoRows,
        );
        let text = err.to_string();
        assert!(text.starts_with("UPDATE on p_orders failed"), "{text}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn transaction_display() {
        let err = HistoryError::Transaction("commit at depth 0".into());
        assert_eq!(err.to_string(), "transaction error: commit at depth 0");
    }

    #[test]
    fn from_rusqlite_error() {
        let err: HistoryError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, HistoryError::Sqlite(_)));
    }
}
