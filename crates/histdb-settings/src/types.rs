//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may contain any subset of fields.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the change-capture engine.
///
/// # JSON Format
///
/// ```json
/// {
///   "enabled": true,
///   "naming": { "trackedPrefix": "p_", "historyPrefix": "z_" },
///   "database": { "historyPath": "/var/lib/app/history.db" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Master switch. When off, writes pass through uncaptured and schema
    /// changes are not mirrored.
    pub enabled: bool,
    /// Tracked/history table naming convention.
    pub naming: NamingSettings,
    /// Names of the bookkeeping columns appended to every history table.
    pub columns: HistoryColumnSettings,
    /// Datastore location and connection pool tuning.
    pub database: DatabaseSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            naming: NamingSettings::default(),
            columns: HistoryColumnSettings::default(),
            database: DatabaseSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl HistorySettings {
    /// Check the settings for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.naming.validate()?;
        self.columns.validate()?;
        if self.database.pool_size == 0 {
            return Err(SettingsError::invalid("database.poolSize", "must be at least 1"));
        }
        if let Some(schema) = &self.database.history_schema {
            if !is_identifier(schema) {
                return Err(SettingsError::invalid(
                    "database.historySchema",
                    format!("not a valid identifier: {schema:?}"),
                ));
            }
        }
        Ok(())
    }
}

/// Tracked/history table naming convention.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NamingSettings {
    /// Prefix that marks a table as tracked.
    pub tracked_prefix: String,
    /// Prefix substituted for the tracked prefix to name the history table.
    pub history_prefix: String,
    /// Prefix of the synthesized history key for single-key tables.
    pub history_key_prefix: String,
    /// Truncation limit for synthesized identifiers.
    pub identifier_max_len: usize,
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            tracked_prefix: "p_".to_string(),
            history_prefix: "z_".to_string(),
            history_key_prefix: "h_".to_string(),
            identifier_max_len: 64,
        }
    }
}

impl NamingSettings {
    /// Reject empty, identical, or non-identifier prefixes.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("naming.trackedPrefix", &self.tracked_prefix),
            ("naming.historyPrefix", &self.history_prefix),
            ("naming.historyKeyPrefix", &self.history_key_prefix),
        ] {
            if !is_identifier(value) {
                return Err(SettingsError::invalid(
                    field,
                    format!("must be a non-empty identifier, got {value:?}"),
                ));
            }
        }
        if self.tracked_prefix == self.history_prefix {
            return Err(SettingsError::invalid(
                "naming.historyPrefix",
                format!("same as naming.trackedPrefix ({:?})", self.tracked_prefix),
            ));
        }
        if self.history_prefix.starts_with(&self.tracked_prefix) {
            return Err(SettingsError::invalid(
                "naming.historyPrefix",
                format!(
                    "{:?} would itself be tracked under prefix {:?}",
                    self.history_prefix, self.tracked_prefix
                ),
            ));
        }
        if self.identifier_max_len < self.history_key_prefix.len() + 1 {
            return Err(SettingsError::invalid(
                "naming.identifierMaxLen",
                format!("{} is too short", self.identifier_max_len),
            ));
        }
        Ok(())
    }
}

/// Bookkeeping column names of a history table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryColumnSettings {
    /// Acting user id (nullable integer).
    pub actor: String,
    /// Action kind (`INSERT`, `UPDATE`, `DELETE`).
    pub action: String,
    /// Write timestamp, defaulted by the datastore.
    pub recorded_at: String,
}

impl Default for HistoryColumnSettings {
    fn default() -> Self {
        Self {
            actor: "actor_id".to_string(),
            action: "action".to_string(),
            recorded_at: "recorded_at".to_string(),
        }
    }
}

impl HistoryColumnSettings {
    fn validate(&self) -> Result<()> {
        let names = [
            ("columns.actor", &self.actor),
            ("columns.action", &self.action),
            ("columns.recordedAt", &self.recorded_at),
        ];
        for (key, name) in names {
            if !is_identifier(name) {
                return Err(SettingsError::invalid(
                    key,
                    format!("not a valid identifier: {name:?}"),
                ));
            }
        }
        if self.actor == self.action
            || self.actor == self.recorded_at
            || self.action == self.recorded_at
        {
            return Err(SettingsError::invalid(
                "columns",
                "bookkeeping column names must be distinct",
            ));
        }
        Ok(())
    }
}

/// Datastore location and pool settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Path of the primary database file.
    pub path: String,
    /// Path of the history database file. When `None`, history tables live
    /// in the primary database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_path: Option<String>,
    /// Schema name the history database is attached under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_schema: Option<String>,
    /// Maximum pool size.
    pub pool_size: u32,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Page cache size in KiB.
    pub cache_size_kib: i64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_dir().join("app.db").to_string_lossy().into_owned(),
            history_path: None,
            history_schema: None,
            pool_size: 16,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
        }
    }
}

impl DatabaseSettings {
    /// Schema holding the history tables: the configured name, `history`
    /// when a separate file is attached, or `main` otherwise.
    pub fn effective_history_schema(&self) -> &str {
        match (&self.history_schema, &self.history_path) {
            (Some(schema), _) => schema,
            (None, Some(_)) => "history",
            (None, None) => "main",
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level for the stderr subscriber (`RUST_LOG` takes precedence).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// `~/.histdb`, falling back to `/tmp/.histdb` without `HOME`.
pub(crate) fn default_dir() -> std::path::PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    std::path::PathBuf::from(home).join(".histdb")
}

/// ASCII letters, digits and underscores, not starting with a digit.
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
