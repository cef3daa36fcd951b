//! Materializes configured tools from table rows.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use agent_config::{ConfigurationManager, ToolConfigRow};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{ToolError, ToolResult, panic_message};
use crate::registry::{CapabilityHandle, CapabilityRegistry, Resolution};
use crate::sandbox::ExpressionSandbox;

/// Snapshot of materialized tools keyed by their declared names.
pub type ToolMap = BTreeMap<String, Value>;

/// Parsed form of a row's `Class` column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassExpression<'a> {
    /// Capability name to resolve.
    pub base: &'a str,
    /// Raw argument string between the outer parentheses.
    pub arguments: Option<&'a str>,
    /// Candidate index used when the base name is ambiguous.
    pub index: Option<usize>,
}

impl<'a> ClassExpression<'a> {
    /// Splits `base`, `base(args)` or `base(args)[index]`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MalformedArgument`] for an empty base name,
    /// unbalanced parentheses, a non-numeric index or trailing text.
    pub fn parse(expression: &'a str) -> ToolResult<Self> {
        let expression = expression.trim();
        let split = expression.find(['(', '[']).unwrap_or(expression.len());
        let base = expression[..split].trim();
        if base.is_empty() {
            return Err(ToolError::malformed(format!(
                "class expression `{expression}` has no capability name"
            )));
        }

        let mut rest = &expression[split..];
        let mut arguments = None;
        if rest.starts_with('(') {
            let close = rest.rfind(')').ok_or_else(|| {
                ToolError::malformed(format!("class expression `{expression}` is missing `)`"))
            })?;
            arguments = Some(&rest[1..close]);
            rest = rest[close + 1..].trim_start();
        }

        let mut index = None;
        if let Some(inner) = rest.strip_prefix('[') {
            let (digits, tail) = inner.split_once(']').ok_or_else(|| {
                ToolError::malformed(format!("class expression `{expression}` is missing `]`"))
            })?;
            index = Some(digits.trim().parse::<usize>().map_err(|_| {
                ToolError::malformed(format!("`{digits}` is not a valid candidate index"))
            })?);
            rest = tail;
        }

        if !rest.trim().is_empty() {
            return Err(ToolError::malformed(format!(
                "unexpected `{}` after class expression",
                rest.trim()
            )));
        }

        Ok(Self {
            base,
            arguments,
            index,
        })
    }
}

/// A row that did not produce a tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedRow {
    /// Declared tool name.
    pub tool: String,
    /// Why the row was skipped.
    pub reason: String,
}

/// Outcome of one load cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Tool names created in this cycle, in row order.
    pub loaded: Vec<String>,
    /// Enabled rows that failed, in row order.
    pub skipped: Vec<SkippedRow>,
}

/// Turns configuration rows into tool instances.
pub struct ToolFactory<'a> {
    registry: &'a CapabilityRegistry,
    config: &'a ConfigurationManager,
    tools: Arc<ToolMap>,
}

impl std::fmt::Debug for ToolFactory<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolFactory")
            .field("capabilities", &self.registry.len())
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<'a> ToolFactory<'a> {
    /// Creates a factory with an empty tool map.
    #[must_use]
    pub fn new(registry: &'a CapabilityRegistry, config: &'a ConfigurationManager) -> Self {
        Self {
            registry,
            config,
            tools: Arc::default(),
        }
    }

    /// Runs a load cycle over `rows` and publishes the resulting map.
    ///
    /// Rows are processed in order. Failures are isolated to their row and
    /// reported in the returned [`LoadReport`].
    pub fn load(&mut self, rows: &[ToolConfigRow]) -> LoadReport {
        let mut tools = ToolMap::new();
        let mut report = LoadReport::default();

        for row in rows.iter().filter(|row| row.enabled) {
            let built = panic::catch_unwind(AssertUnwindSafe(|| self.build(row)))
                .unwrap_or_else(|payload| {
                    Err(ToolError::construction(format!(
                        "panicked while loading: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            match built {
                Ok(tool) => {
                    if tools.insert(row.tool.clone(), tool).is_some() {
                        warn!(tool = %row.tool, "duplicate tool name, replacing earlier instance");
                    }
                    info!(tool = %row.tool, "created tool");
                    report.loaded.push(row.tool.clone());
                }
                Err(err) => {
                    match &err {
                        ToolError::Construction { .. } => {
                            error!(tool = %row.tool, error = %err, "tool not created");
                        }
                        _ => warn!(tool = %row.tool, error = %err, "tool not created"),
                    }
                    report.skipped.push(SkippedRow {
                        tool: row.tool.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        for tool in tools.values_mut() {
            match tool {
                Value::Array(items) if !items.is_empty() => *tool = items.swap_remove(0),
                _ => {}
            }
        }

        self.tools = Arc::new(tools);
        report
    }

    /// Returns the map published by the last load cycle.
    #[must_use]
    pub fn tools(&self) -> Arc<ToolMap> {
        Arc::clone(&self.tools)
    }

    fn build(&self, row: &ToolConfigRow) -> ToolResult<Value> {
        let class = row
            .class
            .as_deref()
            .filter(|class| !class.trim().is_empty())
            .ok_or_else(|| ToolError::resolution(&row.tool, "no class expression configured"))?;
        let class = ClassExpression::parse(class)?;
        info!(
            tool = %row.tool,
            base = class.base,
            arguments = class.arguments.unwrap_or_default(),
            "loading tool"
        );

        let capability = self.select(&class)?;
        let mut args = ExpressionSandbox::new(self.registry).parse(class.arguments)?;

        if row.model().is_some() || row.embedding_model().is_some() {
            match self.config.build_config(row.model(), row.embedding_model()) {
                Some(config) => {
                    args.insert_keyword("config", config.to_value());
                }
                None => info!(tool = %row.tool, "tool has no llm config"),
            }
        }

        let name = capability.qualified_name().to_string();
        panic::catch_unwind(AssertUnwindSafe(|| capability.invoke(args))).unwrap_or_else(|payload| {
            Err(ToolError::construction(format!(
                "`{name}` panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
    }

    fn select(&self, class: &ClassExpression<'_>) -> ToolResult<&'a CapabilityHandle> {
        let resolution = self
            .registry
            .resolve(class.base)
            .ok_or_else(|| ToolError::resolution(class.base, "no capability registered"))?;

        match (resolution, class.index) {
            (Resolution::Unique(handle), _) => Ok(handle),
            (Resolution::Ambiguous(candidates), Some(index)) => {
                candidates.get(index).ok_or_else(|| {
                    ToolError::resolution(
                        class.base,
                        format!("index {index} out of range for {} candidates", candidates.len()),
                    )
                })
            }
            (Resolution::Ambiguous(candidates), None) => {
                let first = resolution.first();
                warn!(
                    name = class.base,
                    candidates = candidates.len(),
                    chosen = %first.qualified_name(),
                    "ambiguous capability name, using the first registered"
                );
                Ok(first)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CapabilityModule;
    use agent_config::{ModelRow, ModelsTable, StaticSecrets};
    use agent_primitives::ResolvedArguments;
    use serde_json::json;

    fn registry() -> CapabilityRegistry {
        let first = CapabilityModule::new()
            .with("echo", |args: ResolvedArguments| -> ToolResult<Value> {
                Ok(args.get(0, "x").cloned().unwrap_or(Value::Null))
            })
            .with("pair", |_args: ResolvedArguments| -> ToolResult<Value> {
                Ok(json!(["primary", "secondary"]))
            })
            .with("configured", |args: ResolvedArguments| -> ToolResult<Value> {
                Ok(args.keyword().get("config").cloned().unwrap_or(Value::Null))
            })
            .with("explode", |_args: ResolvedArguments| -> ToolResult<Value> {
                panic!("capability exploded")
            })
            .with("search", |_args: ResolvedArguments| -> ToolResult<Value> {
                Ok(json!("web"))
            });
        let second = CapabilityModule::new().with(
            "search",
            |_args: ResolvedArguments| -> ToolResult<Value> { Ok(json!("files")) },
        );

        let mut registry = CapabilityRegistry::new();
        registry
            .register_modules([(first, "tools"), (second, "files")])
            .unwrap();
        registry
    }

    fn config() -> ConfigurationManager {
        let table = ModelsTable::new(vec![ModelRow {
            model: "gpt-4".into(),
            provider: Some("openai".into()),
            base_url: None,
            deployment: None,
            context_size: None,
        }]);
        ConfigurationManager::new(table)
            .with_secrets(StaticSecrets::new().with("SECRET_OPENAI_API_KEY", "sk"))
    }

    #[test]
    fn class_expression_parts() {
        let parsed = ClassExpression::parse("reader(path='a(b)', n=1)[2]").unwrap();
        assert_eq!(parsed.base, "reader");
        assert_eq!(parsed.arguments, Some("path='a(b)', n=1"));
        assert_eq!(parsed.index, Some(2));

        let bare = ClassExpression::parse(" files.search ").unwrap();
        assert_eq!(bare.base, "files.search");
        assert_eq!(bare.arguments, None);

        assert!(ClassExpression::parse("(x)").is_err());
        assert!(ClassExpression::parse("reader(x").is_err());
        assert!(ClassExpression::parse("reader()[a]").is_err());
        assert!(ClassExpression::parse("reader() extra").is_err());
    }

    #[test]
    fn disabled_rows_are_ignored() {
        let registry = registry();
        let config = config();
        let mut factory = ToolFactory::new(&registry, &config);
        let report = factory.load(&[
            ToolConfigRow::new("Off", "echo(x=1)").with_enabled(false),
            ToolConfigRow::new("On", "echo(x=2)"),
        ]);

        assert_eq!(report.loaded, ["On"]);
        assert!(report.skipped.is_empty());
        assert_eq!(*factory.tools(), ToolMap::from([("On".to_owned(), json!(2))]));
    }

    #[test]
    fn failing_rows_do_not_affect_others() {
        let registry = registry();
        let config = config();
        let mut factory = ToolFactory::new(&registry, &config);
        let report = factory.load(&[
            ToolConfigRow::new("Unknown", "missing()"),
            ToolConfigRow::new("BadArgs", "echo(x=open('f'))"),
            ToolConfigRow::new("Boom", "explode()"),
            ToolConfigRow::new("Good", "echo(7)"),
        ]);

        assert_eq!(report.loaded, ["Good"]);
        let skipped: Vec<_> = report.skipped.iter().map(|s| s.tool.as_str()).collect();
        assert_eq!(skipped, ["Unknown", "BadArgs", "Boom"]);
        assert!(report.skipped[2].reason.contains("capability exploded"));
        assert_eq!(factory.tools().get("Good"), Some(&json!(7)));
    }

    #[test]
    fn panics_inside_argument_strings_stay_in_their_row() {
        let registry = registry();
        let config = config();
        let mut factory = ToolFactory::new(&registry, &config);
        let report = factory.load(&[
            ToolConfigRow::new("Bad", "echo(x=explode())"),
            ToolConfigRow::new("Good", "echo(x=7)"),
        ]);

        assert_eq!(report.loaded, ["Good"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].tool, "Bad");
        assert!(report.skipped[0].reason.contains("capability exploded"));
        assert_eq!(factory.tools().get("Good"), Some(&json!(7)));
    }

    #[test]
    fn ambiguous_names_honour_index() {
        let registry = registry();
        let config = config();
        let mut factory = ToolFactory::new(&registry, &config);
        let report = factory.load(&[
            ToolConfigRow::new("Default", "search()"),
            ToolConfigRow::new("Second", "search()[1]"),
            ToolConfigRow::new("OutOfRange", "search()[5]"),
        ]);

        let tools = factory.tools();
        assert_eq!(tools.get("Default"), Some(&json!("web")));
        assert_eq!(tools.get("Second"), Some(&json!("files")));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].tool, "OutOfRange");
    }

    #[test]
    fn lists_collapse_to_first_element() {
        let registry = registry();
        let config = config();
        let mut factory = ToolFactory::new(&registry, &config);
        factory.load(&[
            ToolConfigRow::new("Pair", "pair()"),
            ToolConfigRow::new("Empty", "echo(x=[])"),
        ]);

        let tools = factory.tools();
        assert_eq!(tools.get("Pair"), Some(&json!("primary")));
        assert_eq!(tools.get("Empty"), Some(&json!([])));
    }

    #[test]
    fn model_rows_receive_config() {
        let registry = registry();
        let config = config();
        let mut factory = ToolFactory::new(&registry, &config);
        factory.load(&[
            ToolConfigRow::new("WithModel", "configured()").with_model("gpt-4"),
            ToolConfigRow::new("UnknownModel", "configured()").with_model("mystery"),
            ToolConfigRow::new("NoModel", "configured()"),
        ]);

        let tools = factory.tools();
        assert_eq!(
            tools.get("WithModel"),
            Some(&json!({
                "llm": {
                    "provider": "openai",
                    "config": { "model": "gpt-4", "temperature": 0.1, "api_key": "sk" }
                }
            }))
        );
        assert_eq!(tools.get("UnknownModel"), Some(&json!({})));
        assert_eq!(tools.get("NoModel"), Some(&Value::Null));
    }

    #[test]
    fn duplicate_names_keep_last_row() {
        let registry = registry();
        let config = config();
        let mut factory = ToolFactory::new(&registry, &config);
        factory.load(&[
            ToolConfigRow::new("Dup", "echo(1)"),
            ToolConfigRow::new("Dup", "echo(2)"),
        ]);
        assert_eq!(factory.tools().get("Dup"), Some(&json!(2)));
    }

    #[test]
    fn snapshot_is_stable_until_next_load() {
        let registry = registry();
        let config = config();
        let mut factory = ToolFactory::new(&registry, &config);
        factory.load(&[ToolConfigRow::new("A", "echo(1)")]);
        let before = factory.tools();

        factory.load(&[ToolConfigRow::new("B", "echo(2)")]);
        assert!(before.contains_key("A"));
        assert!(!factory.tools().contains_key("A"));
    }
}
