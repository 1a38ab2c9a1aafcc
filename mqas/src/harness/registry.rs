//! Registry of callable job functions.
//!
//! Dotted names resolve the way an import would: the text before the last
//! `.` names a module, the text after it an attribute of that module. Names
//! without a `.` are looked up among globals. Modules not registered here
//! are searched for by the registered [`ModuleLoader`]s.

use super::loader::{Module, ModuleLoader};
use crate::context::ExecutionContext;
use crate::errors::HarnessError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl CallArgs {
    /// Creates call arguments.
    #[must_use]
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Positional arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Keyword arguments.
    #[must_use]
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Deserializes positional argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("missing positional argument {index}"))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("positional argument {index}: {e}"))
    }

    /// Deserializes keyword argument `name`, if given.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        self.kwargs
            .get(name)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| anyhow::anyhow!("keyword argument '{name}': {e}"))
    }

    /// Splits into positional and keyword arguments.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Value>, Map<String, Value>) {
        (self.args, self.kwargs)
    }
}

/// A callable job entry point.
#[async_trait]
pub trait JobFunction: Send + Sync {
    /// Runs the function inside `ctx`.
    async fn call(&self, ctx: &ExecutionContext, call: CallArgs) -> anyhow::Result<Value>;
}

/// Adapts a synchronous closure to [`JobFunction`].
pub struct FnFunction<F>(F);

impl<F> FnFunction<F>
where
    F: Fn(&ExecutionContext, CallArgs) -> anyhow::Result<Value> + Send + Sync,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> JobFunction for FnFunction<F>
where
    F: Fn(&ExecutionContext, CallArgs) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, ctx: &ExecutionContext, call: CallArgs) -> anyhow::Result<Value> {
        (self.0)(ctx, call)
    }
}

/// A module assembled from registered functions.
#[derive(Default)]
pub struct FunctionModule {
    name: String,
    functions: HashMap<String, Arc<dyn JobFunction>>,
}

impl FunctionModule {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }
}

impl Module for FunctionModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, name: &str) -> Option<Arc<dyn JobFunction>> {
        self.functions.get(name).cloned()
    }
}

/// Registry for job functions, modules and module loaders.
#[derive(Default)]
pub struct FunctionRegistry {
    /// Modules built from registered dotted names.
    modules: RwLock<HashMap<String, FunctionModule>>,
    /// Functions registered under bare names.
    globals: RwLock<HashMap<String, Arc<dyn JobFunction>>>,
    /// Fallbacks for modules not registered here.
    loaders: RwLock<Vec<Arc<dyn ModuleLoader>>>,
    /// Paths searched by loaders on every resolution.
    search_paths: RwLock<Vec<PathBuf>>,
}

impl FunctionRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`.
    ///
    /// `"pkg.mod.fn"` adds `fn` to module `pkg.mod`; a name without a `.`
    /// registers a global. Re-registering a name replaces it.
    pub fn register(&self, name: &str, function: Arc<dyn JobFunction>) {
        match name.rsplit_once('.') {
            Some((module, attr)) => {
                self.modules
                    .write()
                    .entry(module.to_string())
                    .or_insert_with(|| FunctionModule::new(module))
                    .functions
                    .insert(attr.to_string(), function);
            }
            None => {
                self.globals.write().insert(name.to_string(), function);
            }
        }
        debug!(function = name, "Registered job function");
    }

    /// Registers a synchronous closure under `name`.
    pub fn register_fn<F>(&self, name: &str, f: F)
    where
        F: Fn(&ExecutionContext, CallArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnFunction::new(f)));
    }

    /// Adds a module loader, consulted in registration order.
    pub fn add_loader(&self, loader: Arc<dyn ModuleLoader>) {
        self.loaders.write().push(loader);
    }

    /// Adds a path searched by loaders on every resolution.
    pub fn add_search_path(&self, path: impl Into<PathBuf>) {
        self.search_paths.write().push(path.into());
    }

    /// Registered names, modules first, sorted.
    #[must_use]
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .read()
            .iter()
            .flat_map(|(module, m)| m.functions.keys().map(move |f| format!("{module}.{f}")))
            .chain(self.globals.read().keys().cloned())
            .collect();
        names.sort();
        names
    }

    /// Whether `name` resolves without consulting loaders.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((module, attr)) => self
                .modules
                .read()
                .get(module)
                .is_some_and(|m| m.functions.contains_key(attr)),
            None => self.globals.read().contains_key(name),
        }
    }

    /// Resolves `name`, searching `extra_paths` after the registry's own
    /// search paths when a loader is needed.
    pub fn resolve(
        &self,
        name: &str,
        extra_paths: &[PathBuf],
    ) -> Result<Arc<dyn JobFunction>, HarnessError> {
        let Some((module, attr)) = name.rsplit_once('.') else {
            return self
                .globals
                .read()
                .get(name)
                .cloned()
                .ok_or_else(|| HarnessError::not_found(name));
        };

        if let Some(registered) = self.modules.read().get(module) {
            return registered
                .attribute(attr)
                .ok_or_else(|| HarnessError::not_found(name));
        }

        let loaded = self.import(module, extra_paths)?;
        loaded
            .attribute(attr)
            .ok_or_else(|| HarnessError::not_found(name))
    }

    fn import(&self, module: &str, extra_paths: &[PathBuf]) -> Result<Arc<dyn Module>, HarnessError> {
        let paths: Vec<PathBuf> = self
            .search_paths
            .read()
            .iter()
            .chain(extra_paths)
            .cloned()
            .collect();
        let loaders: Vec<Arc<dyn ModuleLoader>> = self.loaders.read().clone();

        for loader in loaders {
            if let Some(found) = loader.load(module, &paths)? {
                debug!(module, loader = loader.name(), "Loaded module");
                return Ok(found);
            }
        }
        Err(HarnessError::import_failure(
            module,
            format!("not registered and not found in {} search path(s)", paths.len()),
        ))
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.function_names())
            .field("loaders", &self.loaders.read().len())
            .field("search_paths", &*self.search_paths.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn add(_: &ExecutionContext, call: CallArgs) -> anyhow::Result<Value> {
        Ok(json!(call.arg::<i64>(0)? + call.arg::<i64>(1)?))
    }

    #[test]
    fn test_register_dotted_and_global() {
        let registry = FunctionRegistry::new();
        registry.register_fn("mypkg.mod.add", add);
        registry.register_fn("add", add);

        assert!(registry.contains("mypkg.mod.add"));
        assert!(registry.contains("add"));
        assert!(!registry.contains("mypkg.add"));
        assert_eq!(
            registry.function_names(),
            vec!["add".to_string(), "mypkg.mod.add".to_string()]
        );
    }

    #[tokio::test]
    async fn test_resolve_and_call() {
        let registry = FunctionRegistry::new();
        registry.register_fn("mypkg.mod.add", add);

        let function = registry.resolve("mypkg.mod.add", &[]).unwrap();
        let ctx = ExecutionContext::new();
        let out = function
            .call(&ctx, CallArgs::new(vec![json!(1), json!(2)], Map::new()))
            .await
            .unwrap();
        assert_eq!(out, json!(3));
    }

    #[test]
    fn test_missing_attribute_in_known_module() {
        let registry = FunctionRegistry::new();
        registry.register_fn("mypkg.mod.add", add);

        let err = registry.resolve("mypkg.mod.sub", &[]).err().unwrap();
        assert!(matches!(err, HarnessError::FunctionNotFound { .. }));
    }

    #[test]
    fn test_unknown_module_is_import_failure() {
        let registry = FunctionRegistry::new();
        let err = registry.resolve("missing.mod.fn", &[]).err().unwrap();
        assert!(matches!(err, HarnessError::ImportFailure { ref module, .. } if module == "missing.mod"));
    }

    #[test]
    fn test_unknown_global_is_not_found() {
        let registry = FunctionRegistry::new();
        let err = registry.resolve("nothing", &[]).err().unwrap();
        assert_eq!(err.to_string(), "Function nothing not found!");
    }

    #[test]
    fn test_call_args_helpers() {
        let mut kwargs = Map::new();
        kwargs.insert("name".to_string(), json!("x"));
        let call = CallArgs::new(vec![json!("1")], kwargs);

        assert!(call.arg::<i64>(0).is_err());
        assert!(call.arg::<String>(3).is_err());
        assert_eq!(call.kwarg::<String>("name").unwrap().as_deref(), Some("x"));
        assert_eq!(call.kwarg::<String>("other").unwrap(), None);
    }
}
