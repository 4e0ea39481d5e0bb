//! Tracing initialization for server binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise defaults to `info`
/// for this crate and `warn` elsewhere. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,aqueduct=info"));
    // try_init fails when a subscriber is already installed, which is
    // expected under test harnesses.
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
