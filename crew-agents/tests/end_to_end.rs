use std::sync::Arc;

use async_trait::async_trait;
use crew_agents::adapters::traits::{
    AdapterMetadata, AdapterStream, InferenceChunk, MessageRole, PromptMessage,
};
use crew_agents::adapters::{AdapterResult, InferenceRequest, ModelAdapter, ThrottledInvoker};
use crew_agents::config::{
    ConfigurationManager, ModelRow, ModelsTable, RuntimeSettings, StaticSecrets, ToolConfigRow,
};
use crew_agents::throttle_from_settings;
use crew_agents::tools::builtin;
use crew_agents::tools::factory::ToolFactory;
use crew_agents::tools::registry::CapabilityRegistry;
use futures::stream;
use serde_json::json;

fn registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_modules([(builtin::module(), builtin::ALIAS)])
        .unwrap();
    registry
}

#[test]
fn configured_rows_become_tools() {
    let registry = registry();
    let models = ModelsTable::from(vec![ModelRow {
        model: "gpt-4".to_owned(),
        provider: Some("openai".to_owned()),
        base_url: None,
        deployment: None,
        context_size: Some(8192),
    }]);
    let config = ConfigurationManager::new(models)
        .with_secrets(StaticSecrets::new().with("SECRET_OPENAI_API_KEY", "sk-test"));
    let mut factory = ToolFactory::new(&registry, &config);

    let report = factory.load(&[
        ToolConfigRow::new("EchoTool", "echo(x=5)"),
        ToolConfigRow::new("Off", "echo(x=1)").with_enabled(false),
        ToolConfigRow::new("Ghost", "does_not_exist()"),
        ToolConfigRow::new("Writer", "echo()").with_model("gpt-4"),
    ]);

    assert_eq!(report.loaded, ["EchoTool", "Writer"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].tool, "Ghost");

    let tools = factory.tools();
    assert_eq!(tools.get("EchoTool"), Some(&json!(5)));
    assert!(!tools.contains_key("Off"));
    assert!(!tools.contains_key("Ghost"));
    // `echo` returns null without `x`, so the injected config is not echoed back.
    assert_eq!(tools.get("Writer"), Some(&json!(null)));
}

struct ScriptedModel {
    metadata: AdapterMetadata,
}

#[async_trait]
impl ModelAdapter for ScriptedModel {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn infer(&self, _request: InferenceRequest) -> AdapterResult<AdapterStream> {
        let usage = crew_agents::adapters::TokenUsage {
            prompt_tokens: 5,
            completion_tokens: 5,
            total_tokens: 10,
        };
        Ok(Box::pin(stream::iter(vec![Ok(
            InferenceChunk::new("done", true).with_usage(usage),
        )])))
    }
}

#[tokio::test(start_paused = true)]
async fn settings_drive_a_shared_throttle() {
    let settings = RuntimeSettings {
        rate_limit: Some(600),
        max_response_tokens: 50,
        ..RuntimeSettings::default()
    };
    let throttle = Arc::new(throttle_from_settings(&settings).unwrap());
    let invoker = ThrottledInvoker::new(
        ScriptedModel {
            metadata: AdapterMetadata::new("scripted", "gpt-4"),
        },
        Arc::clone(&throttle),
    )
    .with_max_response_tokens(settings.max_response_tokens);

    let request = InferenceRequest::new(vec![PromptMessage::new(MessageRole::User, "hi")]).unwrap();
    let completion = invoker.complete(request).await.unwrap();

    assert_eq!(completion.content, "done");
    assert_eq!(throttle.remaining_tokens(), Some(590.0));
}

#[test]
fn disabled_rate_limit_means_unbounded() {
    let throttle = throttle_from_settings(&RuntimeSettings::default()).unwrap();
    assert_eq!(throttle.rate_limit(), None);
    assert_eq!(throttle.estimate_cost("anything at all").unwrap(), 0);
}
