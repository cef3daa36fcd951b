//! Row types for the tool configuration and models tables.
//!
//! Both tables arrive pre-parsed (typically exported from a spreadsheet), so
//! the serde names mirror the spreadsheet column headers.

use serde::{Deserialize, Serialize};
use tracing::info;

/// One row of the tool configuration table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfigRow {
    /// Name under which the materialized tool is published.
    #[serde(rename = "Tool")]
    pub tool: String,
    /// Whether the row participates in loading.
    #[serde(rename = "On", default)]
    pub enabled: bool,
    /// Class expression: `base`, `base(args)` or `base(args)[index]`.
    #[serde(rename = "Class", default)]
    pub class: Option<String>,
    /// Language model used by the tool, if any.
    #[serde(rename = "Model", default)]
    pub model: Option<String>,
    /// Embedding model used by the tool, if any.
    #[serde(rename = "Embedding Model", default)]
    pub embedding_model: Option<String>,
}

impl ToolConfigRow {
    /// Creates an enabled row without model references.
    #[must_use]
    pub fn new(tool: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            enabled: true,
            class: Some(class.into()),
            model: None,
            embedding_model: None,
        }
    }

    /// Sets whether the row is enabled.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the language model reference.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the embedding model reference.
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Returns the model reference, treating blank cells as absent.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        non_blank(self.model.as_deref())
    }

    /// Returns the embedding model reference, treating blank cells as absent.
    #[must_use]
    pub fn embedding_model(&self) -> Option<&str> {
        non_blank(self.embedding_model.as_deref())
    }
}

/// One row of the models table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRow {
    /// Model identifier used by tool rows.
    #[serde(rename = "Model")]
    pub model: String,
    /// Provider family, e.g. `openai` or `azure_openai`.
    #[serde(rename = "Provider", default)]
    pub provider: Option<String>,
    /// Provider endpoint.
    #[serde(rename = "base_url", default)]
    pub base_url: Option<String>,
    /// Deployment name for providers that route by deployment.
    #[serde(rename = "Deployment", default)]
    pub deployment: Option<String>,
    /// Context window in tokens.
    #[serde(rename = "Context size", default)]
    pub context_size: Option<u64>,
}

/// Provider connection parameters resolved for a model name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderModelSpec {
    /// Model identifier that was looked up.
    pub model_name: String,
    /// Provider family, if the model is known.
    pub provider: Option<String>,
    /// Deployment name, if any.
    pub deployment_name: Option<String>,
    /// Provider endpoint, if any.
    pub base_url: Option<String>,
}

/// Read-only models table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelsTable {
    rows: Vec<ModelRow>,
}

impl ModelsTable {
    /// Creates a table from rows.
    #[must_use]
    pub fn new(rows: Vec<ModelRow>) -> Self {
        Self { rows }
    }

    /// Returns the row for `model`, using the first exact match.
    #[must_use]
    pub fn find(&self, model: &str) -> Option<&ModelRow> {
        self.rows.iter().find(|row| row.model == model)
    }

    /// Looks up provider parameters for `model`.
    ///
    /// Unknown models yield a spec whose provider fields are all `None`.
    #[must_use]
    pub fn lookup(&self, model: &str) -> ProviderModelSpec {
        let Some(row) = self.find(model) else {
            info!(model, "no match found in models table");
            return ProviderModelSpec {
                model_name: model.to_owned(),
                ..ProviderModelSpec::default()
            };
        };

        ProviderModelSpec {
            model_name: model.to_owned(),
            provider: non_blank(row.provider.as_deref()).map(str::to_owned),
            deployment_name: non_blank(row.deployment.as_deref()).map(str::to_owned),
            base_url: non_blank(row.base_url.as_deref()).map(str::to_owned),
        }
    }

    /// Returns the context window recorded for `model`.
    #[must_use]
    pub fn context_size(&self, model: &str) -> Option<u64> {
        self.find(model).and_then(|row| row.context_size)
    }

    /// Returns the rows in table order.
    #[must_use]
    pub fn rows(&self) -> &[ModelRow] {
        &self.rows
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl From<Vec<ModelRow>> for ModelsTable {
    fn from(rows: Vec<ModelRow>) -> Self {
        Self::new(rows)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_spreadsheet_headers() {
        let row: ToolConfigRow = serde_json::from_value(json!({
            "Tool": "Search",
            "On": true,
            "Class": "search(limit=3)",
            "Model": "gpt-4",
            "Embedding Model": null
        }))
        .unwrap();

        assert_eq!(row.tool, "Search");
        assert!(row.enabled);
        assert_eq!(row.class.as_deref(), Some("search(limit=3)"));
        assert_eq!(row.model(), Some("gpt-4"));
        assert_eq!(row.embedding_model(), None);
    }

    #[test]
    fn missing_on_column_means_disabled() {
        let row: ToolConfigRow = serde_json::from_value(json!({ "Tool": "x" })).unwrap();
        assert!(!row.enabled);
        assert!(row.class.is_none());
    }

    #[test]
    fn lookup_unknown_model_has_no_provider() {
        let table = ModelsTable::new(vec![ModelRow {
            model: "gpt-4".into(),
            provider: Some("openai".into()),
            base_url: Some(String::new()),
            deployment: None,
            context_size: Some(8192),
        }]);

        let known = table.lookup("gpt-4");
        assert_eq!(known.provider.as_deref(), Some("openai"));
        assert_eq!(known.base_url, None);
        assert_eq!(table.context_size("gpt-4"), Some(8192));

        let unknown = table.lookup("mystery");
        assert_eq!(unknown.model_name, "mystery");
        assert_eq!(unknown.provider, None);
    }
}
