//! Loads a tools table, prints the tools it produces, then asks a model to
//! describe each tool through the shared token budget.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crew_agents::adapters::openai::{OpenAiAdapter, OpenAiConfig};
use crew_agents::adapters::traits::{AdapterMetadata, MessageRole, PromptMessage};
use crew_agents::adapters::{
    AdapterResult, BlockingAdapter, BlockingModelAdapter, Completion, InferenceRequest,
    ThrottledInvoker, TokenUsage,
};
use crew_agents::config::loader::{load_models, load_tool_rows};
use crew_agents::config::{ConfigurationManager, ModelsTable, RuntimeSettings};
use crew_agents::telemetry::init_tracing;
use crew_agents::throttle_from_settings;
use crew_agents::tools::builtin;
use crew_agents::tools::factory::{ToolFactory, ToolMap};
use crew_agents::tools::registry::CapabilityRegistry;
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Build tools from configuration tables")]
struct Args {
    /// JSON array of tool rows.
    #[arg(long, default_value = "demos/tool-loader/data/tools.json")]
    tools: PathBuf,

    /// JSON array of model rows.
    #[arg(long)]
    models: Option<PathBuf>,

    /// Runtime settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Groq model used to describe the tools; a local echo model when absent.
    #[arg(long)]
    groq_model: Option<String>,
}

/// Answers with the prompt it was given and reports word counts as usage.
struct LocalEchoModel {
    metadata: AdapterMetadata,
}

impl BlockingModelAdapter for LocalEchoModel {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    fn complete_blocking(&self, request: InferenceRequest) -> AdapterResult<Completion> {
        let content = request.prompt_text();
        let words = content.split_whitespace().count() as u64;
        Ok(Completion {
            content,
            usage: Some(TokenUsage {
                prompt_tokens: words,
                completion_tokens: words,
                total_tokens: words * 2,
            }),
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => RuntimeSettings::from_path(path)?,
        None => RuntimeSettings::default(),
    };
    init_tracing(Some(&settings.log_filter))?;

    let models = match &args.models {
        Some(path) => load_models(path)?,
        None => ModelsTable::default(),
    };
    let rows = load_tool_rows(&args.tools)?;

    let mut registry = CapabilityRegistry::new();
    registry.register_modules([(builtin::module(), builtin::ALIAS)])?;
    info!(capabilities = registry.len(), "registry ready");

    let config = ConfigurationManager::new(models);
    let mut factory = ToolFactory::new(&registry, &config);
    let report = factory.load(&rows);
    for skipped in &report.skipped {
        info!(tool = %skipped.tool, reason = %skipped.reason, "skipped");
    }

    let tools = factory.tools();
    println!("{}", serde_json::to_string_pretty(&*tools)?);

    let throttle = Arc::new(throttle_from_settings(&settings).context("building throttle")?);
    info!(rate_limit = ?throttle.rate_limit(), "throttle ready");

    match args.groq_model {
        Some(model) => {
            let adapter = BlockingAdapter::new(OpenAiAdapter::new(OpenAiConfig::groq(model))?)?;
            let invoker = ThrottledInvoker::new(adapter, Arc::clone(&throttle))
                .with_max_response_tokens(settings.max_response_tokens);
            describe_tools(&invoker, &tools)
        }
        None => {
            let adapter = LocalEchoModel {
                metadata: AdapterMetadata::new("local", "echo"),
            };
            let invoker = ThrottledInvoker::new(adapter, Arc::clone(&throttle))
                .with_max_response_tokens(settings.max_response_tokens);
            describe_tools(&invoker, &tools)
        }
    }
}

fn describe_tools<A>(invoker: &ThrottledInvoker<A>, tools: &ToolMap) -> Result<()>
where
    A: BlockingModelAdapter,
{
    for (name, value) in tools {
        let request = InferenceRequest::new(vec![PromptMessage::new(
            MessageRole::User,
            format!("Describe the tool `{name}` configured as {value}."),
        )])?
        .with_system_prompt("Answer in one sentence.");

        let completion = invoker.complete_blocking(request)?;
        info!(
            tool = %name,
            remaining = ?invoker.throttle().remaining_tokens(),
            "described tool"
        );
        println!("{name}: {}", completion.content);
    }
    Ok(())
}
