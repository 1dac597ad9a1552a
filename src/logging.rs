//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter, e.g. `gradebatch=debug`.
pub const LOG_ENV_VAR: &str = "GRADEBATCH_LOG";

const DEFAULT_FILTER: &str = "gradebatch=info";

static INIT: Once = Once::new();

/// Installs the global subscriber. Logs go to stderr so stdout only carries
/// the run summary.
///
/// Falls back to `gradebatch=info` when `GRADEBATCH_LOG` is unset or
/// invalid. Safe to call more than once.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .init();
    });
}
