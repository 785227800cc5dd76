//! Log subscriber setup.
//!
//! The runtime logs through `tracing`; this module installs a formatting
//! subscriber whose level comes from the `MESH_RPC_LOG_LEVEL` environment
//! variable (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`, `FATAL`). `FATAL`
//! maps to `ERROR`. The default level is `DEBUG`.

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the runtime log level.
pub const LOG_LEVEL_ENV: &str = "MESH_RPC_LOG_LEVEL";

fn level_from_env() -> &'static str {
    match std::env::var(LOG_LEVEL_ENV)
        .unwrap_or_default()
        .to_ascii_uppercase()
        .as_str()
    {
        "TRACE" => "trace",
        "INFO" => "info",
        "WARN" => "warn",
        "ERROR" | "FATAL" => "error",
        _ => "debug",
    }
}

/// Install the global log subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level_from_env()))
        .try_init();
}
