//! General-purpose capabilities available to every deployment.
//!
//! They are mostly useful as helpers inside argument strings, e.g.
//! `items=list(1, 2), header=concat("v", "1")`.

use agent_primitives::ResolvedArguments;
use serde_json::Value;

use crate::capability;
use crate::error::{ToolError, ToolResult};
use crate::registry::CapabilityModule;

/// Alias under which [`module`] is conventionally registered.
pub const ALIAS: &str = "builtin";

/// Returns every capability declared in this module.
#[must_use]
pub fn module() -> CapabilityModule {
    CapabilityModule::collect(module_path!())
}

/// Returns its single argument unchanged (keyword `x` or the first positional).
#[capability]
fn echo(args: ResolvedArguments) -> ToolResult<Value> {
    Ok(args.get(0, "x").cloned().unwrap_or(Value::Null))
}

/// Collects the positional arguments into a list.
#[capability]
fn list(args: ResolvedArguments) -> ToolResult<Value> {
    let (positional, _) = args.into_parts();
    Ok(Value::Array(positional))
}

/// Collects the keyword arguments into a dictionary.
#[capability]
fn dict(args: ResolvedArguments) -> ToolResult<Value> {
    let (_, keyword) = args.into_parts();
    Ok(Value::Object(keyword))
}

/// Joins string arguments, or flattens list arguments into one list.
#[capability]
fn concat(args: ResolvedArguments) -> ToolResult<Value> {
    let (positional, keyword) = args.into_parts();
    if let Some(name) = keyword.keys().next() {
        return Err(ToolError::construction(format!(
            "concat() got an unexpected keyword argument `{name}`"
        )));
    }

    if positional.iter().all(Value::is_array) && !positional.is_empty() {
        let items = positional
            .into_iter()
            .flat_map(|value| match value {
                Value::Array(items) => items,
                _ => Vec::new(),
            })
            .collect();
        return Ok(Value::Array(items));
    }

    positional
        .into_iter()
        .try_fold(String::new(), |mut out, value| match value {
            Value::String(s) => {
                out.push_str(&s);
                Ok(out)
            }
            other => Err(ToolError::construction(format!(
                "concat() expects strings or lists, got `{other}`"
            ))),
        })
        .map(Value::String)
}
