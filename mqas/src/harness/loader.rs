//! Module loaders for functions that live outside the registry.

use super::registry::{CallArgs, JobFunction};
use crate::context::{Bootstrap, ExecutionContext, BOOTSTRAP_ENV};
use crate::errors::HarnessError;
use crate::store::ejson;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Environment variable naming the file a command module writes its result to.
pub const RESULT_FILE_ENV: &str = "MQAS_RESULT_FILE";

/// A namespace of callable attributes.
pub trait Module: Send + Sync {
    /// The dotted module name.
    fn name(&self) -> &str;

    /// Looks up a callable attribute.
    fn attribute(&self, name: &str) -> Option<Arc<dyn JobFunction>>;
}

/// Finds modules that are not registered in-process.
pub trait ModuleLoader: Send + Sync {
    /// Loader name, for logs.
    fn name(&self) -> &str;

    /// Looks for `module` under `search_paths`.
    ///
    /// Returns `Ok(None)` when this loader does not know the module.
    fn load(
        &self,
        module: &str,
        search_paths: &[PathBuf],
    ) -> Result<Option<Arc<dyn Module>>, HarnessError>;
}

/// Maps module `pkg.mod` to the executable `<search path>/pkg/mod`.
///
/// Calling attribute `fn` runs `<exe> fn` with `{"args", "kwargs"}` on
/// stdin and the caller's bootstrap in [`BOOTSTRAP_ENV`]. The executable
/// writes its JSON result to the file named by [`RESULT_FILE_ENV`]; no file
/// content means `null`. A non-zero exit fails the call with the captured
/// stderr, which is also echoed to this process's stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandModuleLoader;

impl CommandModuleLoader {
    /// Creates the loader.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn module_file(root: &Path, module: &str) -> PathBuf {
        module.split('.').fold(root.to_path_buf(), |path, part| path.join(part))
    }
}

impl ModuleLoader for CommandModuleLoader {
    fn name(&self) -> &str {
        "command"
    }

    fn load(
        &self,
        module: &str,
        search_paths: &[PathBuf],
    ) -> Result<Option<Arc<dyn Module>>, HarnessError> {
        if module.split('.').any(|part| part.is_empty() || part == "..") {
            return Err(HarnessError::import_failure(module, "invalid module name"));
        }
        let found = search_paths
            .iter()
            .map(|root| Self::module_file(root, module))
            .find(|candidate| candidate.is_file());

        Ok(found.map(|executable| {
            debug!(module, executable = %executable.display(), "Found command module");
            Arc::new(CommandModule {
                name: module.to_string(),
                executable,
            }) as Arc<dyn Module>
        }))
    }
}

/// An executable exposing functions as its first argument.
#[derive(Debug, Clone)]
pub struct CommandModule {
    name: String,
    executable: PathBuf,
}

impl Module for CommandModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, name: &str) -> Option<Arc<dyn JobFunction>> {
        Some(Arc::new(CommandFunction {
            executable: self.executable.clone(),
            function: name.to_string(),
        }))
    }
}

struct CommandFunction {
    executable: PathBuf,
    function: String,
}

#[async_trait]
impl JobFunction for CommandFunction {
    async fn call(&self, ctx: &ExecutionContext, call: CallArgs) -> anyhow::Result<Value> {
        let result_file = tempfile::NamedTempFile::new()?;
        let bootstrap = Bootstrap::from_context(ctx).to_env_value()?;
        let (args, kwargs) = call.into_parts();
        let input = ejson::encode(&json!({ "args": args, "kwargs": kwargs }))?;

        info!(
            executable = %self.executable.display(),
            function = %self.function,
            "Running command module function"
        );
        let mut child = Command::new(&self.executable)
            .arg(&self.function)
            .env(BOOTSTRAP_ENV, bootstrap)
            .env(RESULT_FILE_ENV, result_file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin while stderr drains, or a chatty child and a large
        // payload block each other.
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(input.as_bytes()).await,
                None => Ok(()),
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if let Err(e) = fed {
            debug!(function = %self.function, error = %e, "Command module did not read its arguments");
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.is_empty() {
            tokio::io::stderr().write_all(stderr.as_bytes()).await?;
        }
        if !output.status.success() {
            anyhow::bail!(
                "{} {} exited with {}: {}",
                self.executable.display(),
                self.function,
                output.status,
                stderr.trim()
            );
        }

        let text = tokio::fs::read_to_string(result_file.path()).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(ejson::decode_str(&text)?)
    }
}
