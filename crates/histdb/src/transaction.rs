//! Nested transactions over one physical connection.
//!
//! [`NestedTransaction`] counts logical `begin`/`commit`/`rollback` calls.
//! Only the outermost level touches the physical transaction; inner levels
//! map to savepoints named after their depth (`LEVEL1`, `LEVEL2`, ...), so
//! three nested begins followed by three commits issue:
//!
//! ```text
//! BEGIN IMMEDIATE
//! SAVEPOINT LEVEL1
//! SAVEPOINT LEVEL2
//! RELEASE SAVEPOINT LEVEL2
//! RELEASE SAVEPOINT LEVEL1
//! COMMIT
//! ```
//!
//! On a backend without savepoints inner levels only move the counter, and an
//! inner rollback poisons the whole transaction: the outermost commit then
//! rolls back and reports an error.

use std::cell::Cell;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::errors::{HistoryError, Result};

/// Physical transaction control the counter drives.
pub trait TransactionControl {
    /// Whether `SAVEPOINT` / `RELEASE` / `ROLLBACK TO` are available.
    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Execute one transaction-control statement.
    fn execute_control(&self, sql: &str) -> rusqlite::Result<()>;
}

impl TransactionControl for Connection {
    fn execute_control(&self, sql: &str) -> rusqlite::Result<()> {
        self.execute_batch(sql)
    }
}

/// Depth-counting transaction over a borrowed connection.
///
/// Not `Sync`: a scope is confined to the thread that owns the connection.
pub struct NestedTransaction<'c> {
    control: &'c dyn TransactionControl,
    depth: Cell<u32>,
    rollback_only: Cell<bool>,
}

impl<'c> NestedTransaction<'c> {
    /// Wrap `control` at depth 0.
    pub fn new(control: &'c dyn TransactionControl) -> Self {
        Self {
            control,
            depth: Cell::new(0),
            rollback_only: Cell::new(false),
        }
    }

    /// Current nesting depth; 0 means no transaction is open.
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    /// Open a level: the physical transaction at depth 0, a savepoint above.
    pub fn begin(&self) -> Result<()> {
        let depth = self.depth.get();
        if depth == 0 {
            self.exec("BEGIN IMMEDIATE")?;
            self.rollback_only.set(false);
        } else if self.control.supports_savepoints() {
            self.exec(&format!("SAVEPOINT LEVEL{depth}"))?;
        }
        self.depth.set(depth + 1);
        debug!(depth = depth + 1, "transaction level opened");
        Ok(())
    }

    /// Close the innermost level, keeping its work.
    ///
    /// The depth only drops when the statement succeeds, so a failed
    /// physical `COMMIT` can still be rolled back.
    pub fn commit(&self) -> Result<()> {
        let depth = self.depth.get();
        if depth == 0 {
            return Err(HistoryError::Transaction(
                "commit without a matching begin".into(),
            ));
        }
        let level = depth - 1;
        if level == 0 {
            if self.rollback_only.get() {
                self.depth.set(0);
                self.rollback_only.set(false);
                self.exec("ROLLBACK")?;
                return Err(HistoryError::Transaction(
                    "an inner level rolled back; transaction rolled back instead of committed"
                        .into(),
                ));
            }
            self.exec("COMMIT")?;
        } else if self.control.supports_savepoints() {
            self.exec(&format!("RELEASE SAVEPOINT LEVEL{level}"))?;
        }
        self.depth.set(level);
        debug!(depth = level, "transaction level committed");
        Ok(())
    }

    /// Close the innermost level, discarding its work.
    pub fn rollback(&self) -> Result<()> {
        let depth = self.depth.get();
        if depth == 0 {
            return Err(HistoryError::Transaction(
                "rollback without a matching begin".into(),
            ));
        }
        let level = depth - 1;
        self.depth.set(level);
        if level == 0 {
            self.rollback_only.set(false);
            self.exec("ROLLBACK")?;
        } else if self.control.supports_savepoints() {
            self.exec(&format!("ROLLBACK TO SAVEPOINT LEVEL{level}"))?;
            self.exec(&format!("RELEASE SAVEPOINT LEVEL{level}"))?;
        } else {
            self.rollback_only.set(true);
        }
        debug!(depth = level, "transaction level rolled back");
        Ok(())
    }

    /// Roll back the entire stack (cancellation). No-op at depth 0.
    pub fn rollback_all(&self) -> Result<()> {
        if self.depth.get() == 0 {
            return Ok(());
        }
        self.depth.set(0);
        self.rollback_only.set(false);
        self.exec("ROLLBACK")
    }

    /// Run `f` inside one level: commit on `Ok`, roll back on `Err` or panic.
    ///
    /// Levels `f` leaves open are rolled back and reported as an error. If `f`
    /// closes the scope's own level, nothing further is committed and the
    /// enclosing levels are left to the caller.
    pub fn scope<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.begin()?;
        let level = self.depth.get();
        let mut guard = ScopeGuard {
            tx: self,
            level,
            armed: true,
        };
        let result = f();
        guard.armed = false;

        if self.depth.get() < level {
            warn!(depth = self.depth.get(), level, "scope level closed by its body");
            return Err(HistoryError::Transaction(format!(
                "scope at depth {level} was closed by its body"
            )));
        }
        if self.depth.get() > level {
            warn!(depth = self.depth.get(), level, "scope left inner levels open");
            self.unwind_to(level);
            return Err(HistoryError::Transaction(format!(
                "scope at depth {level} left inner levels open"
            )));
        }
        match result {
            Ok(value) => match self.commit() {
                Ok(()) => Ok(value),
                Err(err) => {
                    self.unwind_to(level);
                    Err(err)
                }
            },
            Err(err) => {
                warn!(depth = level, error = %err, "transaction scope rolled back");
                self.unwind_to(level);
                Err(err)
            }
        }
    }

    fn unwind_to(&self, level: u32) {
        while self.depth.get() >= level && self.depth.get() > 0 {
            if let Err(err) = self.rollback() {
                warn!(error = %err, "rollback during unwind failed");
            }
        }
    }

    fn exec(&self, sql: &str) -> Result<()> {
        self.control
            .execute_control(sql)
            .map_err(|e| HistoryError::Transaction(format!("{sql} failed: {e}")))
    }
}

impl Drop for NestedTransaction<'_> {
    fn drop(&mut self) {
        if self.depth.get() > 0 {
            warn!(depth = self.depth.get(), "transaction dropped while open, rolling back");
            if let Err(err) = self.rollback_all() {
                warn!(error = %err, "rollback on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for NestedTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedTransaction")
            .field("depth", &self.depth.get())
            .field("rollback_only", &self.rollback_only.get())
            .finish_non_exhaustive()
    }
}

struct ScopeGuard<'t, 'c> {
    tx: &'t NestedTransaction<'c>,
    level: u32,
    armed: bool,
}

impl Drop for ScopeGuard<'_, '_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(depth = self.level, "scope unwound by panic, rolling back");
            self.tx.unwind_to(self.level);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
