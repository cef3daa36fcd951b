//! Resolution of model identifiers into provider configuration.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::schema::{ModelsTable, ProviderModelSpec};
use crate::secrets::{EnvSecrets, SecretSource};

/// Language model used when a tool references only an embedding model.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4-turbo-preview";

/// Embedding model used when a tool references only a language model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Sampling temperature configured for language models.
pub const LLM_TEMPERATURE: f64 = 0.1;

/// Credential placeholder for providers that do not check keys.
pub const PLACEHOLDER_API_KEY: &str = "NA";

/// Connection settings for one component.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSettings {
    /// Model identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Deployment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
    /// Provider endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Provider endpoint under the name embedders expect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ComponentSettings {
    fn clear(&mut self, field: Field) {
        match field {
            Field::DeploymentName => self.deployment_name = None,
            Field::BaseUrl => self.base_url = None,
            Field::ApiBase => self.api_base = None,
            Field::ApiKey => self.api_key = None,
        }
    }
}

/// Provider plus settings for the language model or the embedder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Provider family.
    pub provider: String,
    /// Connection settings, with unset values pruned.
    pub config: ComponentSettings,
}

/// Provider configuration injected into tools as the `config` keyword.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Language model branch, absent when its provider is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<ComponentConfig>,
    /// Embedder branch, absent when its provider is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedder: Option<ComponentConfig>,
}

impl ProviderConfig {
    /// Converts the configuration into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    DeploymentName,
    BaseUrl,
    ApiBase,
    ApiKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Credential {
    Placeholder,
    Environment(String),
    Unchanged,
}

/// Provider families with dedicated post-processing rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// `azure_openai`
    AzureOpenAi,
    /// `openai_compatible`
    OpenAiCompatible,
    /// `openai`
    OpenAi,
    /// `groq`
    Groq,
    /// `ollama`
    Ollama,
    /// Any other provider name.
    Other(String),
}

impl ProviderKind {
    /// Classifies a provider name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "azure_openai" => Self::AzureOpenAi,
            "openai_compatible" => Self::OpenAiCompatible,
            "openai" => Self::OpenAi,
            "groq" => Self::Groq,
            "ollama" => Self::Ollama,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Environment variable holding this provider's credential, if any.
    #[must_use]
    pub fn credential_variable(&self) -> Option<String> {
        match self.credential() {
            Credential::Environment(var) => Some(var),
            Credential::Placeholder | Credential::Unchanged => None,
        }
    }

    fn dropped_fields(&self) -> &'static [Field] {
        match self {
            Self::AzureOpenAi => &[Field::BaseUrl, Field::ApiBase],
            Self::OpenAiCompatible | Self::Groq => &[Field::DeploymentName],
            Self::OpenAi => &[Field::DeploymentName, Field::BaseUrl],
            Self::Ollama => &[Field::ApiBase, Field::ApiKey],
            Self::Other(_) => &[],
        }
    }

    fn credential(&self) -> Credential {
        match self {
            Self::AzureOpenAi => Credential::Environment("AZURE_OPENAI_KEY".into()),
            Self::OpenAiCompatible => Credential::Placeholder,
            Self::OpenAi => Credential::Environment("SECRET_OPENAI_API_KEY".into()),
            Self::Groq => Credential::Environment("GROQ_API_KEY".into()),
            Self::Ollama => Credential::Unchanged,
            Self::Other(name) => {
                Credential::Environment(format!("{}_API_KEY", name.to_uppercase().replace('-', "_")))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Component {
    Llm,
    Embedder,
}

impl Component {
    const fn label(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Embedder => "embedder",
        }
    }

    const fn default_model(self) -> &'static str {
        match self {
            Self::Llm => DEFAULT_LLM_MODEL,
            Self::Embedder => DEFAULT_EMBEDDING_MODEL,
        }
    }
}

/// Builds provider configuration from a read-only models table.
#[derive(Clone)]
pub struct ConfigurationManager {
    models: Arc<ModelsTable>,
    secrets: Arc<dyn SecretSource>,
}

impl fmt::Debug for ConfigurationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationManager")
            .field("models", &self.models.len())
            .finish_non_exhaustive()
    }
}

impl ConfigurationManager {
    /// Creates a manager that reads credentials from the environment.
    #[must_use]
    pub fn new(models: impl Into<Arc<ModelsTable>>) -> Self {
        Self {
            models: models.into(),
            secrets: Arc::new(EnvSecrets),
        }
    }

    /// Replaces the credential source.
    #[must_use]
    pub fn with_secrets<S>(mut self, secrets: S) -> Self
    where
        S: SecretSource + 'static,
    {
        self.secrets = Arc::new(secrets);
        self
    }

    /// Returns the models table.
    #[must_use]
    pub fn models(&self) -> &ModelsTable {
        &self.models
    }

    /// Looks up provider parameters for `model`.
    #[must_use]
    pub fn lookup(&self, model: &str) -> ProviderModelSpec {
        self.models.lookup(model)
    }

    /// Builds the provider configuration for a tool.
    ///
    /// Returns `None` when neither model is supplied. A branch whose provider
    /// cannot be determined is omitted.
    #[must_use]
    pub fn build_config(
        &self,
        model: Option<&str>,
        embedding_model: Option<&str>,
    ) -> Option<ProviderConfig> {
        if model.is_none() && embedding_model.is_none() {
            return None;
        }

        let config = ProviderConfig {
            llm: self.component(Component::Llm, model),
            embedder: self.component(Component::Embedder, embedding_model),
        };
        debug!(?model, ?embedding_model, ?config, "built provider config");
        Some(config)
    }

    fn component(&self, component: Component, requested: Option<&str>) -> Option<ComponentConfig> {
        let spec = requested.map(|model| self.lookup(model)).unwrap_or_default();
        let Some(provider) = spec.provider else {
            info!(component = component.label(), "no provider found, omitting branch");
            return None;
        };
        let kind = ProviderKind::parse(&provider);

        let mut settings = ComponentSettings {
            model: Some(requested.unwrap_or(component.default_model()).to_owned()),
            deployment_name: spec.deployment_name,
            base_url: spec.base_url.clone(),
            api_base: match component {
                Component::Embedder => spec.base_url,
                Component::Llm => None,
            },
            temperature: match component {
                Component::Llm => Some(LLM_TEMPERATURE),
                Component::Embedder => None,
            },
            api_key: Some(PLACEHOLDER_API_KEY.to_owned()),
        };

        match kind.credential() {
            Credential::Placeholder => settings.api_key = Some(PLACEHOLDER_API_KEY.to_owned()),
            Credential::Environment(variable) => {
                settings.api_key = self.secrets.secret(&variable);
                if settings.api_key.is_none() {
                    warn!(provider = %provider, variable = %variable, "credential is not set");
                }
            }
            Credential::Unchanged => {}
        }

        for field in kind.dropped_fields() {
            settings.clear(*field);
        }

        Some(ComponentConfig {
            provider,
            config: settings,
        })
    }
}
