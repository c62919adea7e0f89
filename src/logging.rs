//! Tracing initialisation.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Default filter when `LLG_LOG` is not set.
pub const DEFAULT_FILTER: &str = "llg_engine=info";

/// Install the global tracing subscriber.
///
/// The filter comes from `override_filter` if given, else from the `LLG_LOG`
/// environment variable (e.g. `LLG_LOG=llg_engine=debug`), else `llg_engine=info`.
/// Logs go to stderr so stdout stays usable for the `serve` protocol.
///
/// Calling this more than once is a no-op.
pub fn init_tracing(override_filter: Option<&str>) {
    INIT.call_once(|| {
        let filter = match override_filter {
            Some(f) => EnvFilter::try_new(f).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
            None => EnvFilter::try_from_env("LLG_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        };

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true),
            )
            .with(filter)
            .init();
    });
}
