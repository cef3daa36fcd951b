//! Configuration tables and provider settings for crew agents.
//!
//! The [`schema`] module describes the tool and model tables, [`manager`]
//! turns a model identifier into provider connection parameters, and
//! [`loader`] reads tables and [`settings::RuntimeSettings`] from disk.

#![warn(missing_docs, clippy::pedantic)]

pub mod error;
pub mod loader;
pub mod manager;
pub mod schema;
pub mod secrets;
pub mod settings;

pub use error::{ConfigError, ConfigResult};
pub use manager::{
    ComponentConfig, ComponentSettings, ConfigurationManager, ProviderConfig, ProviderKind,
};
pub use schema::{ModelRow, ModelsTable, ProviderModelSpec, ToolConfigRow};
pub use secrets::{EnvSecrets, SecretSource, StaticSecrets};
pub use settings::RuntimeSettings;
