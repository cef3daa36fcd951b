//! Shared error definitions for agent primitives.

use thiserror::Error;

/// Result alias used throughout the agent runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating agent primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// Capability name failed validation.
    #[error("invalid capability name `{name}`: {reason}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A capability was invoked without an argument it requires.
    #[error("missing argument `{name}` (position {position})")]
    MissingArgument {
        /// Keyword under which the argument may be supplied.
        name: String,
        /// Position at which the argument may be supplied.
        position: usize,
    },
}
