use agent_config::{ConfigurationManager, ModelsTable, ToolConfigRow};
use agent_primitives::ResolvedArguments;
use agent_tools::factory::ToolFactory;
use agent_tools::registry::{CapabilityModule, CapabilityRegistry, ExplicitCapability};
use agent_tools::sandbox::ExpressionSandbox;
use agent_tools::{ToolError, ToolResult, builtin, capability};
use serde_json::{Value, json};

mod files {
    use super::*;

    pub fn module() -> CapabilityModule {
        CapabilityModule::collect(module_path!())
    }

    #[capability]
    fn reader(args: ResolvedArguments) -> ToolResult<Value> {
        let path = args.require(0, "path")?;
        Ok(json!({ "kind": "reader", "path": path }))
    }

    #[capability(name = "write_text")]
    fn writer(args: ResolvedArguments) -> ToolResult<Value> {
        Ok(json!({ "kind": "writer", "args": args }))
    }

    pub mod nested {
        use super::*;

        #[capability]
        fn lines(_args: ResolvedArguments) -> ToolResult<Value> {
            Ok(json!(["first line", "second line"]))
        }
    }
}

fn registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_modules([(files::module(), "files"), (builtin::module(), builtin::ALIAS)])
        .unwrap();
    registry
}

#[test]
fn attribute_registers_functions_from_module_path() {
    let registry = registry();
    assert_eq!(
        registry.qualified_names(),
        [
            "builtin.concat",
            "builtin.dict",
            "builtin.echo",
            "builtin.list",
            "files.lines",
            "files.reader",
            "files.write_text",
        ]
    );
    assert!(registry.get_capability("writer").is_none());
}

#[test]
fn sandbox_calls_collected_capabilities() {
    let registry = registry();
    let sandbox = ExpressionSandbox::new(&registry);
    let args = sandbox
        .parse(Some(r#"files.reader(path="notes.md"), tags=list("a", "b"), n=echo(x=2) * 3"#))
        .unwrap();

    assert_eq!(
        args.positional(),
        [json!({ "kind": "reader", "path": "notes.md" })]
    );
    assert_eq!(args.keyword().get("tags"), Some(&json!(["a", "b"])));
    assert_eq!(args.keyword().get("n"), Some(&json!(6)));
}

#[test]
fn explicit_capabilities_join_the_registry() {
    let mut registry = registry();
    let registered = registry
        .register_explicit([
            ExplicitCapability::new(|_args: ResolvedArguments| -> ToolResult<Value> {
                Ok(json!("loaded"))
            })
            .with_name("load_tools"),
            ExplicitCapability::new(|_args: ResolvedArguments| -> ToolResult<Value> {
                Err(ToolError::construction("never registered"))
            }),
        ])
        .unwrap();

    assert_eq!(registered, 1);
    assert!(registry.contains("unknown_module.load_tools"));
    assert!(registry.contains("load_tools"));
}

#[test]
fn factory_builds_tools_from_collected_capabilities() {
    let registry = registry();
    let config = ConfigurationManager::new(ModelsTable::default());
    let mut factory = ToolFactory::new(&registry, &config);

    let report = factory.load(&[
        ToolConfigRow::new("Reader", "reader('a.txt')"),
        ToolConfigRow::new("Writer", "write_text(mode='append')"),
        ToolConfigRow::new("Lines", "files.lines()"),
        ToolConfigRow::new("Missing", "reader()"),
    ]);

    let tools = factory.tools();
    assert_eq!(tools.get("Reader"), Some(&json!({ "kind": "reader", "path": "a.txt" })));
    assert_eq!(
        tools.get("Writer"),
        Some(&json!({ "kind": "writer", "args": { "keyword": { "mode": "append" } } }))
    );
    assert_eq!(tools.get("Lines"), Some(&json!("first line")));
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("path"));
}
