//! Capability registry and rate-governed invocation for agent crews.
//!
//! This facade bundles the workspace crates behind feature flags. Enable
//! `tools` to build tools from configuration rows, `adapters` for throttled
//! model access, `config` for the table loaders and `telemetry` for the
//! shared tracing setup.

#![warn(missing_docs, clippy::pedantic)]

/// Shared argument and naming primitives.
pub use agent_primitives as primitives;

/// Model adapters and throttling (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use agent_adapters as adapters;

/// Capability registry, sandbox and tool factory (enabled by `tools` feature).
#[cfg(feature = "tools")]
pub use agent_tools as tools;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

/// Configuration tables and provider settings (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;

/// Builds the process-wide throttle described by runtime settings.
///
/// # Errors
///
/// Returns an error if the tokenizer cannot be loaded or the rate limit is zero.
#[cfg(all(feature = "adapters", feature = "config"))]
pub fn throttle_from_settings(
    settings: &agent_config::RuntimeSettings,
) -> agent_adapters::ThrottleResult<agent_adapters::Throttle> {
    agent_adapters::Throttle::new(
        agent_adapters::ThrottleConfig::new()
            .with_rate_limit(settings.rate_limit)
            .with_tokenizer_model(settings.tokenizer_model.clone()),
    )
}
