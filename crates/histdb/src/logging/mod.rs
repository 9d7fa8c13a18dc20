//! Structured logging with `tracing`.
//!
//! The engine emits `debug` events for each capture step, `info` for applied
//! migrations and mirrored DDL, and `warn` whenever a scope is rolled back.
//! Events carry `table`, `action` and `rows` fields.
//!
//! - [`init_subscriber`] installs a compact stderr subscriber.
//! - [`test_utils`] captures events in memory for assertions.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use histdb_settings::LoggingSettings;

/// Initialize the global tracing subscriber with stderr output only.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` takes precedence over `level`.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // set_global_default is a no-op if already set
    let _ = subscriber.try_init();
}

/// [`init_subscriber`] at the level from the `logging` settings section.
pub fn init_from_settings(settings: &LoggingSettings) {
    init_subscriber(&settings.level);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
