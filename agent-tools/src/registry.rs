//! Name-indexed registry of capability factories.
//!
//! Capabilities are registered once at startup, either from a
//! [`CapabilityModule`] (an explicit table of `(symbol, factory)` pairs, or the
//! set of `#[capability]` functions collected from a module path) or one by one
//! through [`CapabilityRegistry::register_explicit`]. Every capability is indexed
//! twice: under its unique qualified name `alias.symbol` and under its bare
//! symbol, where collisions keep discovery order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use agent_primitives::{QualifiedName, ResolvedArguments};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{ToolError, ToolResult};

/// Module name used for explicit capabilities that do not declare one.
pub const UNKNOWN_MODULE: &str = "unknown_module";

/// Plain function signature accepted by the `#[capability]` attribute.
pub type CapabilityFn = fn(ResolvedArguments) -> ToolResult<Value>;

/// Trait implemented by capability factories.
pub trait Capability: Send + Sync {
    /// Builds a tool from the resolved arguments.
    ///
    /// # Errors
    ///
    /// Implementations return [`ToolError::Construction`] when the tool cannot
    /// be built from the supplied arguments.
    fn invoke(&self, args: ResolvedArguments) -> ToolResult<Value>;
}

impl<F> Capability for F
where
    F: Fn(ResolvedArguments) -> ToolResult<Value> + Send + Sync,
{
    fn invoke(&self, args: ResolvedArguments) -> ToolResult<Value> {
        (self)(args)
    }
}

/// Build-time registration record emitted by the `#[capability]` attribute.
#[derive(Clone, Copy)]
pub struct CapabilityDescriptor {
    symbol: &'static str,
    module_path: &'static str,
    factory: CapabilityFn,
}

impl CapabilityDescriptor {
    /// Creates a descriptor for a function declared in `module_path`.
    #[must_use]
    pub const fn new(symbol: &'static str, module_path: &'static str, factory: CapabilityFn) -> Self {
        Self {
            symbol,
            module_path,
            factory,
        }
    }

    /// Returns the exported symbol.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        self.symbol
    }

    /// Returns the Rust module path the function was declared in.
    #[must_use]
    pub const fn module_path(&self) -> &'static str {
        self.module_path
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("symbol", &self.symbol)
            .field("module_path", &self.module_path)
            .finish_non_exhaustive()
    }
}

inventory::collect!(CapabilityDescriptor);

/// Ordered set of exports registered together under one alias.
#[derive(Clone, Default)]
pub struct CapabilityModule {
    exports: Vec<(String, Arc<dyn Capability>)>,
}

impl fmt::Debug for CapabilityModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbols: Vec<_> = self.exports.iter().map(|(symbol, _)| symbol).collect();
        f.debug_struct("CapabilityModule")
            .field("exports", &symbols)
            .finish()
    }
}

impl CapabilityModule {
    /// Creates an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an export to the module.
    #[must_use]
    pub fn with<C>(mut self, symbol: impl Into<String>, capability: C) -> Self
    where
        C: Capability + 'static,
    {
        self.exports.push((symbol.into(), Arc::new(capability)));
        self
    }

    /// Collects every `#[capability]` function declared in `module_path` or one
    /// of its submodules.
    ///
    /// Link order is not stable, so exports are sorted by module path and then
    /// symbol to keep discovery order deterministic.
    #[must_use]
    pub fn collect(module_path: &str) -> Self {
        let nested = format!("{module_path}::");
        let mut descriptors: Vec<&CapabilityDescriptor> =
            inventory::iter::<CapabilityDescriptor>
                .into_iter()
                .filter(|d| d.module_path == module_path || d.module_path.starts_with(&nested))
                .collect();
        descriptors.sort_by_key(|d| (d.module_path, d.symbol));

        descriptors
            .into_iter()
            .fold(Self::new(), |module, d| module.with(d.symbol, d.factory))
    }

    /// Returns the exported symbols in discovery order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.exports.iter().map(|(symbol, _)| symbol.as_str())
    }

    /// Returns the number of exports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Returns `true` when the module exports nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}

/// A capability that is registered on its own rather than through a module.
///
/// Identity metadata is optional here so that incomplete entries surface as a
/// logged [`ToolError::Registration`] instead of a startup failure.
#[derive(Clone)]
pub struct ExplicitCapability {
    name: Option<String>,
    module: Option<String>,
    target: Arc<dyn Capability>,
}

impl ExplicitCapability {
    /// Wraps an invocable without identity metadata.
    #[must_use]
    pub fn new<C>(target: C) -> Self
    where
        C: Capability + 'static,
    {
        Self {
            name: None,
            module: None,
            target: Arc::new(target),
        }
    }

    /// Sets the symbol name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the declaring module.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

impl From<CapabilityDescriptor> for ExplicitCapability {
    fn from(descriptor: CapabilityDescriptor) -> Self {
        Self::new(descriptor.factory)
            .with_name(descriptor.symbol)
            .with_module(descriptor.module_path.replace("::", "."))
    }
}

/// Handle to a registered capability.
#[derive(Clone)]
pub struct CapabilityHandle {
    name: QualifiedName,
    target: Arc<dyn Capability>,
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CapabilityHandle {
    /// Returns the unique qualified name.
    #[must_use]
    pub fn qualified_name(&self) -> &QualifiedName {
        &self.name
    }

    /// Returns the bare symbol name.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.name.symbol()
    }

    /// Invokes the underlying factory.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the capability.
    pub fn invoke(&self, args: ResolvedArguments) -> ToolResult<Value> {
        self.target.invoke(args)
    }
}

/// Outcome of resolving a name against the registry.
#[derive(Debug, Clone, Copy)]
pub enum Resolution<'a> {
    /// Exactly one capability matched.
    Unique(&'a CapabilityHandle),
    /// Several capabilities share the simple name, in discovery order.
    Ambiguous(&'a [CapabilityHandle]),
}

impl<'a> Resolution<'a> {
    /// Returns the first candidate, the default disambiguation policy.
    #[must_use]
    pub fn first(self) -> &'a CapabilityHandle {
        match self {
            Self::Unique(handle) => handle,
            Self::Ambiguous(candidates) => &candidates[0],
        }
    }
}

/// Registry that indexes capability factories by qualified and simple name.
#[derive(Default)]
pub struct CapabilityRegistry {
    qualified: HashMap<String, CapabilityHandle>,
    simple: HashMap<String, Vec<CapabilityHandle>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.qualified.keys().collect();
        names.sort();
        f.debug_struct("CapabilityRegistry")
            .field("registered", &names)
            .finish()
    }
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every export of each `(module, alias)` pair.
    ///
    /// Exports whose alias or symbol are not valid names are logged and skipped.
    /// Returns the number of capabilities registered.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::DuplicateCapability`] if a qualified name is
    /// registered twice; the module list itself is inconsistent in that case.
    pub fn register_modules<I, A>(&mut self, modules: I) -> ToolResult<usize>
    where
        I: IntoIterator<Item = (CapabilityModule, A)>,
        A: AsRef<str>,
    {
        let mut registered = 0;
        for (module, alias) in modules {
            let alias = alias.as_ref();
            for (symbol, target) in module.exports {
                match QualifiedName::new(alias, symbol.as_str()) {
                    Ok(name) => {
                        self.insert(name, target)?;
                        registered += 1;
                    }
                    Err(err) => {
                        warn!(alias, symbol = %symbol, error = %err, "skipping module export");
                    }
                }
            }
        }
        Ok(registered)
    }

    /// Registers capabilities that are not part of any module.
    ///
    /// Entries without a name fail with [`ToolError::Registration`], which is
    /// logged; the remaining entries are still registered. Returns the number of
    /// capabilities registered.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::DuplicateCapability`] if a qualified name is
    /// registered twice.
    pub fn register_explicit<I>(&mut self, capabilities: I) -> ToolResult<usize>
    where
        I: IntoIterator<Item = ExplicitCapability>,
    {
        let mut registered = 0;
        for capability in capabilities {
            match Self::identify(&capability) {
                Ok(name) => {
                    self.insert(name, capability.target)?;
                    registered += 1;
                }
                Err(err) => error!(error = %err, "failed to register explicit capability"),
            }
        }
        Ok(registered)
    }

    fn identify(capability: &ExplicitCapability) -> ToolResult<QualifiedName> {
        let symbol = capability
            .name
            .as_deref()
            .ok_or_else(|| ToolError::Registration {
                reason: "capability has no name".into(),
            })?;
        let module = capability.module.as_deref().unwrap_or(UNKNOWN_MODULE);
        Ok(QualifiedName::new(module, symbol)?)
    }

    fn insert(&mut self, name: QualifiedName, target: Arc<dyn Capability>) -> ToolResult<()> {
        let key = name.to_string();
        if self.qualified.contains_key(&key) {
            return Err(ToolError::DuplicateCapability { name: key });
        }

        let handle = CapabilityHandle { name, target };
        let simple = self
            .simple
            .entry(handle.simple_name().to_owned())
            .or_default();
        simple.push(handle.clone());
        info!(
            capability = %key,
            simple_name = handle.simple_name(),
            collisions = simple.len() - 1,
            "registered capability"
        );
        self.qualified.insert(key, handle);
        Ok(())
    }

    /// Resolves `name` by exact qualified name first, then by simple name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Resolution<'_>> {
        if let Some(handle) = self.qualified.get(name) {
            return Some(Resolution::Unique(handle));
        }
        match self.simple.get(name)?.as_slice() {
            [] => None,
            [handle] => Some(Resolution::Unique(handle)),
            candidates => Some(Resolution::Ambiguous(candidates)),
        }
    }

    /// Returns the capability registered under `name`.
    ///
    /// When several capabilities share the simple name, the first registered
    /// one is returned and a warning is logged.
    #[must_use]
    pub fn get_capability(&self, name: &str) -> Option<&CapabilityHandle> {
        match self.resolve(name)? {
            Resolution::Unique(handle) => Some(handle),
            Resolution::Ambiguous(candidates) => {
                warn!(
                    name,
                    candidates = candidates.len(),
                    chosen = %candidates[0].qualified_name(),
                    "multiple capabilities share this name, returning the first"
                );
                Some(&candidates[0])
            }
        }
    }

    /// Returns every capability registered under the simple name, in
    /// discovery order.
    #[must_use]
    pub fn candidates(&self, simple_name: &str) -> &[CapabilityHandle] {
        self.simple.get(simple_name).map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if a qualified or simple name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.qualified.contains_key(name) || self.simple.contains_key(name)
    }

    /// Lists all qualified names in sorted order.
    #[must_use]
    pub fn qualified_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.qualified.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.qualified.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.qualified.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> impl Fn(ResolvedArguments) -> ToolResult<Value> + Send + Sync {
        move |_args| Ok(value.clone())
    }

    fn registry() -> CapabilityRegistry {
        let files = CapabilityModule::new()
            .with("reader", constant(json!("files.reader")))
            .with("writer", constant(json!("files.writer")));
        let web = CapabilityModule::new().with("reader", constant(json!("web.reader")));

        let mut registry = CapabilityRegistry::new();
        let count = registry
            .register_modules([(files, "files"), (web, "web")])
            .unwrap();
        assert_eq!(count, 3);
        registry
    }

    #[test]
    fn qualified_lookup_is_exact() {
        let registry = registry();
        for name in registry.qualified_names() {
            let handle = registry.get_capability(name).expect("registered");
            assert_eq!(handle.qualified_name().to_string(), name);
            assert_eq!(handle.invoke(ResolvedArguments::new()).unwrap(), json!(name));
        }
    }

    #[test]
    fn simple_name_collision_returns_first_registered() {
        let registry = registry();
        let handle = registry.get_capability("reader").expect("registered");
        assert_eq!(handle.qualified_name().to_string(), "files.reader");

        let candidates: Vec<_> = registry
            .candidates("reader")
            .iter()
            .map(|h| h.qualified_name().to_string())
            .collect();
        assert_eq!(candidates, ["files.reader", "web.reader"]);
        assert!(matches!(registry.resolve("reader"), Some(Resolution::Ambiguous(c)) if c.len() == 2));
        assert!(matches!(registry.resolve("writer"), Some(Resolution::Unique(_))));
    }

    #[test]
    fn duplicate_qualified_registration_errors() {
        let mut registry = registry();
        let again = CapabilityModule::new().with("writer", constant(Value::Null));
        let err = registry
            .register_modules([(again, "files")])
            .expect_err("duplicate registration should fail");

        assert!(matches!(err, ToolError::DuplicateCapability { name } if name == "files.writer"));
    }

    #[test]
    fn explicit_registration_skips_anonymous_entries() {
        let mut registry = CapabilityRegistry::new();
        let count = registry
            .register_explicit([
                ExplicitCapability::new(constant(json!(1))),
                ExplicitCapability::new(constant(json!(2))).with_name("load_tools"),
                ExplicitCapability::new(constant(json!(3)))
                    .with_name("search")
                    .with_module("langchain.tools"),
            ])
            .unwrap();

        assert_eq!(count, 2);
        assert!(registry.contains("unknown_module.load_tools"));
        assert!(registry.contains("langchain.tools.search"));
        assert!(registry.contains("search"));
    }

    #[test]
    fn invalid_symbols_are_skipped() {
        let module = CapabilityModule::new()
            .with("not-an-identifier", constant(Value::Null))
            .with("fine", constant(Value::Null));
        let mut registry = CapabilityRegistry::new();
        assert_eq!(registry.register_modules([(module, "tools")]).unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        let registry = registry();
        assert!(registry.get_capability("missing").is_none());
        assert!(registry.candidates("missing").is_empty());
    }
}
