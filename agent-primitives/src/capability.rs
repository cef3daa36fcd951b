//! Capability names shared across the registry and sandbox.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_ALIAS_LEN: usize = 128;
const MAX_SYMBOL_LEN: usize = 96;

/// Fully qualified capability name of the form `alias.symbol`.
///
/// The alias may itself be dotted (`crew.tools.files`); the symbol is always the
/// final segment and must be a bare identifier.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    alias: String,
    symbol: String,
}

impl QualifiedName {
    /// Creates a qualified name from a module alias and symbol.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if the alias is not a dotted path of
    /// identifiers or the symbol is not a bare identifier.
    pub fn new(alias: impl Into<String>, symbol: impl Into<String>) -> Result<Self> {
        let alias = alias.into();
        let symbol = symbol.into();
        validate_alias(&alias)?;
        validate_symbol(&symbol)?;
        Ok(Self { alias, symbol })
    }

    /// Returns the module alias.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Returns the simple (unqualified) symbol name.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.symbol)
    }
}

impl FromStr for QualifiedName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (alias, symbol) = s.rsplit_once('.').ok_or_else(|| Error::InvalidName {
            name: s.to_owned(),
            reason: "qualified name must have the form `alias.symbol`".into(),
        })?;
        Self::new(alias, symbol)
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<QualifiedName> for String {
    fn from(value: QualifiedName) -> Self {
        value.to_string()
    }
}

/// Returns `true` if `candidate` is a bare identifier (`[A-Za-z_][A-Za-z0-9_]*`).
#[must_use]
pub fn is_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_symbol(symbol: &str) -> Result<()> {
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(Error::InvalidName {
            name: symbol.into(),
            reason: format!("symbol length must be <= {MAX_SYMBOL_LEN}"),
        });
    }
    if !is_identifier(symbol) {
        return Err(Error::InvalidName {
            name: symbol.into(),
            reason: "symbol must be an identifier".into(),
        });
    }
    Ok(())
}

fn validate_alias(alias: &str) -> Result<()> {
    if alias.len() > MAX_ALIAS_LEN {
        return Err(Error::InvalidName {
            name: alias.into(),
            reason: format!("alias length must be <= {MAX_ALIAS_LEN}"),
        });
    }
    if !alias.split('.').all(is_identifier) {
        return Err(Error::InvalidName {
            name: alias.into(),
            reason: "alias must be a dot-separated path of identifiers".into(),
        });
    }
    Ok(())
}
