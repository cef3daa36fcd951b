//! Arguments resolved from a configuration row before a capability is invoked.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Ordered positional values plus named keyword values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedArguments {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    positional: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    keyword: Map<String, Value>,
}

impl ResolvedArguments {
    /// Creates an empty argument set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates arguments from already evaluated parts.
    #[must_use]
    pub fn from_parts(positional: Vec<Value>, keyword: Map<String, Value>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    /// Appends a positional value.
    #[must_use]
    pub fn with_positional(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    /// Adds or replaces a keyword value.
    #[must_use]
    pub fn with_keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keyword.insert(name.into(), value);
        self
    }

    /// Adds or replaces a keyword value in place, returning the previous value.
    pub fn insert_keyword(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.keyword.insert(name.into(), value)
    }

    /// Returns the positional values in order.
    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Returns the keyword values.
    #[must_use]
    pub fn keyword(&self) -> &Map<String, Value> {
        &self.keyword
    }

    /// Returns `true` when no argument was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Looks up an argument by keyword first, then by position.
    #[must_use]
    pub fn get(&self, position: usize, name: &str) -> Option<&Value> {
        self.keyword
            .get(name)
            .or_else(|| self.positional.get(position))
    }

    /// Like [`ResolvedArguments::get`] but fails when the argument is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArgument`] if neither the keyword nor the position
    /// is populated.
    pub fn require(&self, position: usize, name: &str) -> Result<&Value> {
        self.get(position, name).ok_or_else(|| Error::MissingArgument {
            name: name.to_owned(),
            position,
        })
    }

    /// Splits the arguments into their positional and keyword parts.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Value>, Map<String, Value>) {
        (self.positional, self.keyword)
    }
}
