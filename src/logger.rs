//! Opt-in log output for programs built on converge.
//!
//! The library only emits [tracing] events: remote commands and skip decisions at `debug`,
//! applied nodes at `info`, and cleanup failures at `warn`. Nothing is printed until the
//! program installs a subscriber, for example with [init].

use anyhow::Context;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The filter used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_FILTER: &str = "warn";

/// Installs a global subscriber that writes compact lines to stderr.
///
/// Reads the filter from `RUST_LOG`, e.g. `RUST_LOG=converge=debug` to see every remote command.
/// Fails if a global subscriber is already installed.
pub fn init() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
        .context("failed to install log subscriber")
}

