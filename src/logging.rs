//! Tracing setup for the `lift-causal` binary and embedders.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "LIFT_CAUSAL_LOG";

static INIT: Once = Once::new();

/// Install the global subscriber, once.
///
/// Reads `LIFT_CAUSAL_LOG` (e.g. `lift_causal::domain::fitter=debug`), falling
/// back to `lift_causal=info`. Output goes to stderr so stdout stays free for
/// command results.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("lift_causal=info"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .with(filter)
            .init();
    });
}
