//! Errors produced while registering, resolving, and materializing tools.

use std::any::Any;

use thiserror::Error;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors produced by capability registration and tool construction.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Capability lacked the identity metadata needed to register it.
    #[error("capability registration failed: {reason}")]
    Registration {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A qualified name was registered twice.
    #[error("capability `{name}` is already registered")]
    DuplicateCapability {
        /// Qualified name of the offending capability.
        name: String,
    },

    /// A capability or model reference could not be resolved.
    #[error("cannot resolve `{name}`: {reason}")]
    Resolution {
        /// Name that failed to resolve.
        name: String,
        /// Additional context for the failure.
        reason: String,
    },

    /// An argument string could not be parsed or evaluated.
    #[error("malformed argument: {reason}")]
    MalformedArgument {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// The capability itself failed while building the tool.
    #[error("tool construction failed: {reason}")]
    Construction {
        /// Human-readable error returned by the capability.
        reason: String,
    },
}

impl ToolError {
    /// Creates a malformed-argument error from the supplied reason.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedArgument {
            reason: reason.into(),
        }
    }

    /// Creates a resolution error for `name`.
    #[must_use]
    pub fn resolution(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a construction error from the supplied reason.
    #[must_use]
    pub fn construction(reason: impl Into<String>) -> Self {
        Self::Construction {
            reason: reason.into(),
        }
    }
}

/// Extracts the message carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

impl From<agent_primitives::Error> for ToolError {
    fn from(err: agent_primitives::Error) -> Self {
        match err {
            agent_primitives::Error::InvalidName { .. } => Self::Registration {
                reason: err.to_string(),
            },
            agent_primitives::Error::MissingArgument { .. } => Self::Construction {
                reason: err.to_string(),
            },
        }
    }
}
