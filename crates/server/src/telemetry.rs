//! Tracing subscriber initialization.
//!
//! `RUST_LOG` takes precedence when set; otherwise falls back to the
//! configured [`crate::config::TelemetrySection::log_filter`].

use tracing_subscriber::EnvFilter;

use crate::config::TelemetrySection;

/// Install the global `tracing` subscriber. Must be called exactly once,
/// before any other tracing calls.
pub fn init(config: &TelemetrySection) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone()));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
