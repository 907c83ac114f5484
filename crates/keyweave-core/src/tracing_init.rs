//! Shared tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"keyweave_crypto=debug"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str, log_json: bool) -> crate::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    let installed = if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    installed.map_err(|e| crate::Error::Config(format!("tracing already initialised: {e}")))
}

/// Initialise tracing from the `log` section of a loaded [`Config`](crate::Config).
pub fn init_from_config(log: &LogConfig) -> crate::Result<()> {
    init_tracing(&log.level, log.json)
}
