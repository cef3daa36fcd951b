//! Core shared types for the capability registry and tool factory.

#![warn(missing_docs, clippy::pedantic)]

mod arguments;
mod capability;
mod error;

/// Positional and keyword arguments handed to capability factories.
pub use arguments::ResolvedArguments;
/// Validated `alias.symbol` capability names.
pub use capability::{QualifiedName, is_identifier};
/// Error type and result alias shared across the SDK.
pub use error::{Error, Result};
