//! Tracing initialization for the `cfx` binary.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "CFX_LOG";

/// Install the global subscriber, writing to stderr.
///
/// Reads `CFX_LOG` for filter directives, e.g.
/// `CFX_LOG=context_fusion=debug,context_fusion_core=info`. Falls back to
/// `info` if unset or invalid. Idempotent.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
    });
}
