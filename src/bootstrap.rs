//! Process initialization helpers for embedders.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with the `SKALD_LOG` environment variable.
///
/// Defaults to "info" level if `SKALD_LOG` is not set. Call once at process
/// start; later calls panic because a global subscriber is already set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("SKALD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
