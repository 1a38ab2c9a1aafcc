//! Piped mode: one job per child process, payload on stdin.

use super::dispatch::dispatch;
use super::payload::Payload;
use super::registry::FunctionRegistry;
use super::sink::{read_sink, write_sink, ErrorRecord, SinkRecord};
use crate::config::{RunnerConfig, RuntimeConfig};
use crate::context::{Bootstrap, ExecutionContext, BOOTSTRAP_ENV};
use crate::errors::HarnessError;
use crate::store::{ejson, StoreConnector};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Child exit code for a payload that could not be read or decoded.
pub const EXIT_INVALID_PAYLOAD: i32 = 2;

/// What the parent observed after the child exited.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOutcome {
    /// The child's exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// The sink record, if an output file was requested and written.
    pub sink: Option<SinkRecord>,
}

/// Spawns a child process per job and feeds it the payload.
#[derive(Debug, Clone)]
pub struct PipedLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    modules: Vec<PathBuf>,
}

impl PipedLauncher {
    /// Creates a launcher for `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            modules: Vec::new(),
        }
    }

    /// Creates a launcher from runner settings.
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            program: config.program(),
            args: config.args.clone(),
            envs: Vec::new(),
            modules: config.modules.clone(),
        }
    }

    /// Adds an argument passed to the program.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets an environment variable for the child, on top of the inherited
    /// environment.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Adds a module search path to every payload.
    #[must_use]
    pub fn with_module(mut self, path: impl Into<PathBuf>) -> Self {
        self.modules.push(path.into());
        self
    }

    /// Runs `payload` in a fresh child process and waits for it to exit.
    ///
    /// The child receives `bootstrap` through [`BOOTSTRAP_ENV`] and the
    /// payload on stdin, which is closed once written. Its stdout and
    /// stderr are inherited.
    pub async fn launch(
        &self,
        bootstrap: &Bootstrap,
        payload: &Payload,
    ) -> Result<LaunchOutcome, HarnessError> {
        let mut payload = payload.clone();
        payload.modules.extend(self.modules.iter().cloned());
        let input = payload.encode()?;
        let env = bootstrap
            .to_env_value()
            .map_err(|e| HarnessError::InvalidPayload(e.to_string()))?;

        info!(
            program = %self.program.display(),
            function = %payload.function_name,
            job_id = bootstrap.job_id.as_deref().unwrap_or_default(),
            "Launching piped job"
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(BOOTSTRAP_ENV, env)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(input.as_bytes()).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!(
                    function = %payload.function_name,
                    error = %e,
                    "Child stopped reading its payload"
                );
            }
        }
        let status = child.wait().await?;
        info!(
            function = %payload.function_name,
            exit_code = ?status.code(),
            "Piped job exited"
        );

        let sink = match &payload.output {
            Some(output) => match read_sink(output).await {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(output = %output.display(), error = %e, "No readable sink after job exit");
                    None
                }
            },
            None => None,
        };

        Ok(LaunchOutcome {
            exit_code: status.code(),
            sink,
        })
    }
}

/// Child side: rehydrates the context from the environment, reads the
/// payload from stdin and dispatches it. Returns the process exit code.
///
/// Connection values missing from the bootstrap come from
/// `config.connection`; locks the job builds use `config.lock`.
pub async fn run_piped(
    registry: &FunctionRegistry,
    config: &RuntimeConfig,
    connector: Arc<dyn StoreConnector>,
) -> i32 {
    let ctx = child_context(config, Bootstrap::from_env(), connector);

    let mut text = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut text).await {
        error!(error = %e, "Failed to read payload from stdin");
        return EXIT_INVALID_PAYLOAD;
    }
    dispatch_text(registry, &ctx, &text).await
}

fn child_context(
    config: &RuntimeConfig,
    bootstrap: Bootstrap,
    connector: Arc<dyn StoreConnector>,
) -> ExecutionContext {
    bootstrap
        .or_connection(&config.connection)
        .into_context(connector)
        .with_lock_config(config.lock.clone())
}

/// Decodes `text` as a payload and dispatches it. Returns the exit code.
///
/// A job failure still exits `0`: its outcome is in the sink. An
/// undecodable payload exits [`EXIT_INVALID_PAYLOAD`], after writing an error
/// record if an `output` path could still be read from it.
pub async fn dispatch_text(registry: &FunctionRegistry, ctx: &ExecutionContext, text: &str) -> i32 {
    let raw = match ejson::decode_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "Payload is not valid JSON");
            return EXIT_INVALID_PAYLOAD;
        }
    };
    let output = raw.get("output").and_then(Value::as_str).map(PathBuf::from);

    match Payload::from_value(raw) {
        Ok(payload) => {
            dispatch(registry, ctx, &payload).await;
            0
        }
        Err(e) => {
            error!(error = %e, "Invalid payload");
            if let Some(output) = output {
                let record = SinkRecord::Error(ErrorRecord::from_error(&e));
                if let Err(e) = write_sink(&output, &record).await {
                    warn!(output = %output.display(), error = %e, "Failed to write sink");
                }
            }
            EXIT_INVALID_PAYLOAD
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        registry.register_fn("m.job", |ctx, _| Ok(json!(ctx.current_job_id())));
        registry
    }

    #[tokio::test]
    async fn test_dispatch_text_runs_payload() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("sink.json");
        let mut ctx = ExecutionContext::new();
        ctx.set_value(crate::context::keys::JOB_ID, "job-7");
        let text = Payload::new("m.job").with_output(&output).encode().unwrap();

        assert_eq!(dispatch_text(&registry(), &ctx, &text).await, 0);
        assert_eq!(read_sink(&output).await.unwrap(), SinkRecord::Result(json!("job-7")));
    }

    #[tokio::test]
    async fn test_invalid_payload_writes_error_when_output_known() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("sink.json");
        let text = json!({ "args": [1], "output": output }).to_string();

        let code = dispatch_text(&registry(), &ExecutionContext::new(), &text).await;

        assert_eq!(code, EXIT_INVALID_PAYLOAD);
        let record = read_sink(&output).await.unwrap();
        assert!(record.error().unwrap().message.contains("Invalid payload"));
    }

    #[tokio::test]
    async fn test_garbage_payload() {
        let code = dispatch_text(&registry(), &ExecutionContext::new(), "{{{").await;
        assert_eq!(code, EXIT_INVALID_PAYLOAD);
    }

    #[test]
    fn test_launcher_from_config() {
        let config = RunnerConfig {
            program: Some(PathBuf::from("/usr/bin/mqas-job")),
            args: vec!["--quiet".to_string()],
            modules: vec![PathBuf::from("/plugins")],
        };
        let launcher = PipedLauncher::from_config(&config).with_module("/more");
        assert_eq!(launcher.program, PathBuf::from("/usr/bin/mqas-job"));
        assert_eq!(launcher.modules.len(), 2);
    }

    #[tokio::test]
    async fn test_launch_missing_program_is_io_error() {
        let launcher = PipedLauncher::new("/definitely/not/a/program");
        let err = launcher
            .launch(&Bootstrap::new(), &Payload::new("m.job"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exiting_before_reading_still_yields_sink() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("sink.json");
        let launcher = PipedLauncher::new("/bin/sh")
            .with_arg("-c")
            .with_arg(r#"printf '{"result": 1}' > "$0"; exit 4"#)
            .with_arg(output.display().to_string());
        let payload = Payload::new("m.job")
            .with_arg("z".repeat(1 << 20))
            .with_output(&output);

        let outcome = launcher.launch(&Bootstrap::new(), &payload).await.unwrap();

        assert_eq!(outcome.exit_code, Some(4));
        assert_eq!(outcome.sink, Some(SinkRecord::Result(json!(1))));
    }

    #[tokio::test]
    async fn test_child_context_takes_runtime_config() {
        let mut config = RuntimeConfig::default();
        config
            .apply_env(|key| match key {
                crate::config::ENV_DB_CONN => Some("memory://child-config".to_string()),
                crate::config::ENV_LOCK_TIMEOUT => Some("5".to_string()),
                _ => None,
            })
            .unwrap();
        let connector: Arc<dyn StoreConnector> = Arc::new(crate::store::SchemeConnector::new());

        let ctx = child_context(&config, Bootstrap::new().with_worker_id("w-1"), connector.clone());
        let lock = crate::reservation::ReservationLock::from_context(&ctx).await.unwrap();

        assert_eq!(lock.config().timeout(), std::time::Duration::from_secs(5));
        assert!(lock.has_store());
        assert_eq!(ctx.collection_name(), Some("jobs"));
        assert_eq!(
            ctx.get(crate::context::keys::DB_CONN),
            Some(&json!("memory://child-config"))
        );

        let explicit = Bootstrap::new().with_connection("memory://parent", "db", "coll");
        let ctx = child_context(&config, explicit, connector);
        assert_eq!(ctx.get(crate::context::keys::DB_CONN), Some(&json!("memory://parent")));
        assert_eq!(ctx.collection_name(), Some("coll"));
    }
}
