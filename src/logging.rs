//! Structured logging initialization.
//!
//! Console output with an environment-driven filter; set
//! `TASKCYCLE_LOG_JSON=true` for JSON lines in production deployments.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber once; later calls are no-ops.
/// Filter comes from `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("TASKCYCLE_LOG_JSON")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let registry = tracing_subscriber::registry().with(filter);
        let result = if json {
            registry
                .with(fmt::layer().with_target(true).with_ansi(false).json())
                .try_init()
        } else {
            registry.with(fmt::layer().with_target(true)).try_init()
        };

        // A subscriber installed by the host application wins; not an error
        if result.is_err() {
            tracing::debug!("tracing subscriber already installed, skipping");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
    }
}
