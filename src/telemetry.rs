//! Tracing setup for embedders and tests.
//!
//! Library code only emits `tracing` events; the agent hosting the manager
//! owns the sinks. This module is a convenience for binaries and tests that
//! have no subscriber of their own.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install a global subscriber. `RUST_LOG` wins over `verbosity`.
pub fn init(verbosity: u8) {
    let _ = try_init(verbosity);
}

/// Like [`init`] but reports whether a subscriber was already installed,
/// so repeated initialization in tests is harmless.
pub fn try_init(verbosity: u8) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
}
