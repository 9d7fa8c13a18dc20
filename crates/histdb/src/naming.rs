//! Tracked-table naming convention.
//!
//! Which tables are tracked, and what their history tables and synthesized
//! history keys are called, is a pluggable [`NamingPolicy`]. The default
//! [`PrefixNaming`] marks tracked tables with a fixed prefix (`p_orders`) and
//! names the history table by swapping in another prefix (`z_orders`).

use std::fmt;

use histdb_settings::NamingSettings;

/// Maps tracked table names to history table names.
pub trait NamingPolicy: Send + Sync + fmt::Debug {
    /// Whether mutations of `table` are captured.
    fn is_tracked(&self, table: &str) -> bool;

    /// History table for `table`, or `None` if `table` is not tracked.
    fn history_table(&self, table: &str) -> Option<String>;

    /// Name of the synthesized history primary key, derived from the tracked
    /// table's key column(s).
    fn history_key(&self, primary_key: &[String]) -> String;
}

/// Prefix-substitution naming (`p_orders` → `z_orders`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixNaming {
    tracked_prefix: String,
    history_prefix: String,
    key_prefix: String,
    max_len: usize,
}

impl PrefixNaming {
    /// Policy with explicit prefixes and the default key prefix and length.
    pub fn new(tracked_prefix: &str, history_prefix: &str) -> Self {
        let defaults = NamingSettings::default();
        Self {
            tracked_prefix: tracked_prefix.to_string(),
            history_prefix: history_prefix.to_string(),
            key_prefix: defaults.history_key_prefix,
            max_len: defaults.identifier_max_len,
        }
    }

    /// Policy from validated settings.
    pub fn from_settings(settings: &NamingSettings) -> Self {
        Self {
            tracked_prefix: settings.tracked_prefix.clone(),
            history_prefix: settings.history_prefix.clone(),
            key_prefix: settings.history_key_prefix.clone(),
            max_len: settings.identifier_max_len,
        }
    }

    fn truncate(&self, name: &str) -> String {
        name.chars().take(self.max_len).collect()
    }
}

impl Default for PrefixNaming {
    fn default() -> Self {
        Self::from_settings(&NamingSettings::default())
    }
}

impl NamingPolicy for PrefixNaming {
    fn is_tracked(&self, table: &str) -> bool {
        table.len() > self.tracked_prefix.len() && table.starts_with(&self.tracked_prefix)
    }

    fn history_table(&self, table: &str) -> Option<String> {
        if !self.is_tracked(table) {
            return None;
        }
        let suffix = &table[self.tracked_prefix.len()..];
        Some(format!("{}{suffix}", self.history_prefix))
    }

    fn history_key(&self, primary_key: &[String]) -> String {
        match primary_key {
            [single] => self.truncate(&format!("{}{single}", self.key_prefix)),
            many => self.truncate(&many.join("_")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
