//! The job execution harness.
//!
//! This module provides:
//! - The payload contract and the `{result}`/`{error}` sink
//! - The function registry and module loaders that resolve dotted names
//! - Embedded dispatch inside the current process
//! - Piped dispatch, one child process per job

mod builtins;
mod dispatch;
mod loader;
mod payload;
mod piped;
mod registry;
mod sink;

pub use builtins::{register_builtins, BUILTINS_MODULE};
pub use dispatch::dispatch;
pub use loader::{CommandModule, CommandModuleLoader, Module, ModuleLoader, RESULT_FILE_ENV};
pub use payload::Payload;
pub use piped::{dispatch_text, run_piped, LaunchOutcome, PipedLauncher, EXIT_INVALID_PAYLOAD};
pub use registry::{CallArgs, FnFunction, FunctionModule, FunctionRegistry, JobFunction};
pub use sink::{read_sink, write_sink, ErrorRecord, SinkRecord};

use crate::context::{Bootstrap, ExecutionContext};
use crate::store::{SchemeConnector, StoreConnector};
use std::sync::Arc;

/// Runs jobs embedded in the current process.
#[derive(Debug, Clone)]
pub struct Harness {
    registry: Arc<FunctionRegistry>,
    connector: Arc<dyn StoreConnector>,
}

impl Harness {
    /// Creates a harness over `registry`, opening stores by scheme.
    #[must_use]
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            connector: Arc::new(SchemeConnector::new()),
        }
    }

    /// Sets the connector used by rehydrated contexts.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// The function registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Rehydrates a fresh context from `bootstrap` and dispatches `payload`
    /// in it.
    pub async fn execute_embedded(&self, bootstrap: &Bootstrap, payload: &Payload) -> SinkRecord {
        let ctx = bootstrap.clone().into_context(self.connector.clone());
        dispatch(&self.registry, &ctx, payload).await
    }

    /// Dispatches `payload` in a context the caller already holds.
    pub async fn execute_in(&self, ctx: &ExecutionContext, payload: &Payload) -> SinkRecord {
        dispatch(&self.registry, ctx, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::keys;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_embedded_rehydrates_context() {
        let registry = Arc::new(FunctionRegistry::new());
        register_builtins(&registry);
        let harness = Harness::new(registry);

        let bootstrap = Bootstrap::new()
            .with_job_id("job-42")
            .with_worker_id("worker-1")
            .with_connection("memory://embedded", "jobs", "queue");
        let record = harness
            .execute_embedded(&bootstrap, &Payload::new("mqas.builtins.context"))
            .await;

        assert_eq!(
            record,
            SinkRecord::Result(json!({
                "job_id": "job-42",
                "worker_id": "worker-1",
                "device_id": null,
                "collection": "queue",
            }))
        );
    }

    #[tokio::test]
    async fn test_embedded_does_not_touch_caller_context() {
        let registry = Arc::new(FunctionRegistry::new());
        registry.register_fn("job", |ctx, _| Ok(json!(ctx.current_job_id())));
        let harness = Harness::new(registry);

        let mut caller = ExecutionContext::new();
        caller.set_value(keys::JOB_ID, "caller-job");

        let embedded = harness
            .execute_embedded(&Bootstrap::new(), &Payload::new("job"))
            .await;
        assert_eq!(embedded.result(), Some(&json!(null)));

        let inline = harness.execute_in(&caller, &Payload::new("job")).await;
        assert_eq!(inline.result(), Some(&json!("caller-job")));
    }
}
