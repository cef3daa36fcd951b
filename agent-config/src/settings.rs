//! Process-level runtime settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::loader::read_json;

/// Settings shared by the throttle, the tokenizer and logging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Upstream budget in tokens per minute; `None` disables throttling.
    pub rate_limit: Option<u64>,
    /// Tokens reserved for each response.
    pub max_response_tokens: u64,
    /// Model whose encoding is used to estimate request cost.
    pub tokenizer_model: String,
    /// Default `tracing` filter directive.
    pub log_filter: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            rate_limit: None,
            max_response_tokens: 1000,
            tokenizer_model: "gpt-4".to_owned(),
            log_filter: "info".to_owned(),
        }
    }
}

impl RuntimeSettings {
    /// Reads settings from a JSON file; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError`] if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        read_json(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_use_defaults() {
        let settings: RuntimeSettings = serde_json::from_str(r#"{"rate_limit": 9000}"#).unwrap();
        assert_eq!(settings.rate_limit, Some(9000));
        assert_eq!(settings.max_response_tokens, 1000);
        assert_eq!(settings.tokenizer_model, "gpt-4");
        assert_eq!(settings.log_filter, "info");
    }
}
