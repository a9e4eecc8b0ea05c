//! Bootstrap utilities shared by the server binary and tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{CONFIG_ENV_VAR, LOG_ENV_VAR};

/// Initialize tracing with the FACTUS_BRIDGE_LOG environment variable.
///
/// Defaults to "info" level if FACTUS_BRIDGE_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve the configuration file path: first CLI argument, then the
/// FACTUS_BRIDGE_CONFIG environment variable, then none (defaults apply).
pub fn parse_config_path() -> Option<String> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .filter(|p| !p.is_empty())
}
