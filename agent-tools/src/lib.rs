//! Capability discovery, restricted argument evaluation, and tool loading.
//!
//! Capabilities are named factories registered in a [`registry::CapabilityRegistry`].
//! Configuration rows name a capability plus an argument string; the
//! [`sandbox::ExpressionSandbox`] turns that string into arguments and the
//! [`factory::ToolFactory`] invokes the capability to produce a tool instance.

#![warn(missing_docs, clippy::pedantic)]

extern crate self as agent_tools;

pub mod builtin;
pub mod error;
pub mod factory;
pub mod registry;
pub mod sandbox;

pub use agent_tools_macros::capability;
pub use error::{ToolError, ToolResult};

#[doc(hidden)]
pub use inventory;
