//! Tracing setup shared by binaries built on the crew tool layer.
//!
//! Libraries in this workspace only emit `tracing` events; installing a
//! subscriber is left to the process entry point, which calls
//! [`init_tracing`] once.

#![warn(missing_docs, clippy::pedantic)]

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "RUST_LOG";

/// Default directive used when neither `RUST_LOG` nor a configured filter is set.
pub const DEFAULT_FILTER: &str = "info";

/// Resolves the filter directive, preferring `RUST_LOG` over `configured`.
#[must_use]
pub fn resolve_filter(configured: Option<&str>) -> String {
    std::env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| configured.map(str::to_owned))
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

/// Installs a global `fmt` subscriber.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global subscriber
/// has already been installed.
pub fn init_tracing(configured: Option<&str>) -> Result<()> {
    let directive = resolve_filter(configured);
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log filter `{directive}`"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}
