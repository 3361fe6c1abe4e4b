//! Tracing setup for the `forge` binary.
//!
//! Stdout carries stage observations and JSON records for the driver, so all
//! diagnostics go to stderr. Stage operations open spans carrying `run_id`;
//! toolchain runs add `program` and `timeout_secs`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable.
const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber. Call once, before parsing arguments.
///
/// `RUST_LOG=forge=info` shows each toolchain command as it is spawned;
/// `forge=debug` adds record writes and process exit details.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
