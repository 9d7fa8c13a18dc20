//! # histdb-settings
//!
//! Configuration for the histdb change-capture engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`HistorySettings::default()`]
//! 2. **User file** — `~/.histdb/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `HISTDB_*` overrides (highest priority)
//!
//! There is no process-wide settings singleton: callers load a
//! [`HistorySettings`] once and hand it to the engine explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
