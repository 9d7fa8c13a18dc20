//! Injected engine configuration.
//!
//! A [`HistoryContext`] bundles everything the engine would otherwise read
//! from ambient globals: the master switch, the naming policy, the
//! bookkeeping column names, the schema holding history tables, and the
//! acting-user source. It is cheap to clone (shared parts are `Arc`s).

use std::fmt;
use std::sync::Arc;

use histdb_settings::{HistoryColumnSettings, HistorySettings};

use crate::actor::{ActorSource, FixedActor};
use crate::errors::{HistoryError, Result};
use crate::naming::{NamingPolicy, PrefixNaming};

/// Engine configuration passed explicitly to every entry point.
#[derive(Clone)]
pub struct HistoryContext {
    enabled: bool,
    naming: Arc<dyn NamingPolicy>,
    columns: HistoryColumnSettings,
    history_schema: String,
    actor: Arc<dyn ActorSource>,
}

impl HistoryContext {
    /// Context with the given naming policy, capture enabled, default
    /// bookkeeping columns, history tables in `main`, and no actor.
    pub fn new(naming: impl NamingPolicy + 'static) -> Self {
        Self {
            enabled: true,
            naming: Arc::new(naming),
            columns: HistoryColumnSettings::default(),
            history_schema: "main".to_string(),
            actor: Arc::new(FixedActor(None)),
        }
    }

    /// Context from loaded settings. Invalid settings (e.g. a malformed
    /// naming convention) are a configuration error.
    pub fn from_settings(settings: &HistorySettings, actor: Arc<dyn ActorSource>) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| HistoryError::configuration("<settings>", e.to_string()))?;
        Ok(Self {
            enabled: settings.enabled,
            naming: Arc::new(PrefixNaming::from_settings(&settings.naming)),
            columns: settings.columns.clone(),
            history_schema: settings.database.effective_history_schema().to_string(),
            actor,
        })
    }

    /// Replace the actor source.
    #[must_use]
    pub fn with_actor(mut self, actor: impl ActorSource + 'static) -> Self {
        self.actor = Arc::new(actor);
        self
    }

    /// Place history tables in an attached schema.
    #[must_use]
    pub fn with_history_schema(mut self, schema: &str) -> Self {
        self.history_schema = schema.to_string();
        self
    }

    /// Toggle capture and mirroring.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Rename the bookkeeping columns.
    #[must_use]
    pub fn with_columns(mut self, columns: HistoryColumnSettings) -> Self {
        self.columns = columns;
        self
    }

    /// Whether capture and mirroring are on.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The naming policy.
    pub fn naming(&self) -> &dyn NamingPolicy {
        self.naming.as_ref()
    }

    /// Bookkeeping column names.
    pub fn columns(&self) -> &HistoryColumnSettings {
        &self.columns
    }

    /// Schema holding the history tables.
    pub fn history_schema(&self) -> &str {
        &self.history_schema
    }

    /// The acting-user source.
    pub fn actor(&self) -> &dyn ActorSource {
        self.actor.as_ref()
    }

    /// Whether `column` is one of the bookkeeping columns.
    pub(crate) fn is_bookkeeping(&self, column: &str) -> bool {
        column == self.columns.actor
            || column == self.columns.action
            || column == self.columns.recorded_at
    }
}

impl Default for HistoryContext {
    fn default() -> Self {
        Self::new(PrefixNaming::default())
    }
}

impl fmt::Debug for HistoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryContext")
            .field("enabled", &self.enabled)
            .field("naming", &self.naming)
            .field("columns", &self.columns)
            .field("history_schema", &self.history_schema)
            .finish_non_exhaustive()
    }
}
