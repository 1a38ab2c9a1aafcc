//! Resolve, invoke, capture.

use super::payload::Payload;
use super::registry::{CallArgs, FunctionRegistry};
use super::sink::{write_sink, SinkRecord};
use crate::context::ExecutionContext;
use crate::errors::HarnessError;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Runs `payload` inside `ctx` and returns the sink record.
///
/// Every failure (import, resolution, error return, panic) becomes an error
/// record; nothing propagates to the caller. The record is written to
/// `payload.output` when set, and a failed write is only logged.
pub async fn dispatch(
    registry: &FunctionRegistry,
    ctx: &ExecutionContext,
    payload: &Payload,
) -> SinkRecord {
    let outcome = invoke(registry, ctx, payload).await;
    match &outcome {
        Ok(_) => info!(
            function = %payload.function_name,
            job_id = ctx.current_job_id().unwrap_or_default(),
            "Job function completed"
        ),
        Err(e) => warn!(
            function = %payload.function_name,
            job_id = ctx.current_job_id().unwrap_or_default(),
            kind = e.kind(),
            error = %e,
            "Job function failed"
        ),
    }

    let record = SinkRecord::from_outcome(outcome);
    if let Some(output) = &payload.output {
        if let Err(e) = write_sink(output, &record).await {
            warn!(output = %output.display(), error = %e, "Failed to write sink");
        }
    }
    record
}

async fn invoke(
    registry: &FunctionRegistry,
    ctx: &ExecutionContext,
    payload: &Payload,
) -> Result<Value, HarnessError> {
    let modules: Vec<PathBuf> = payload.modules.iter().map(|p| absolute(p)).collect();
    let function = registry.resolve(&payload.function_name, &modules)?;
    let call = CallArgs::new(payload.args.clone(), payload.kwargs.clone());

    match AssertUnwindSafe(function.call(ctx, call)).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(HarnessError::invocation(&payload.function_name, e)),
        Err(panic) => Err(HarnessError::Panicked {
            function: payload.function_name.clone(),
            message: panic_message(&*panic),
        }),
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        registry.register_fn("mypkg.mod.fn", |_, call: CallArgs| {
            Ok(json!(call.arg::<i64>(0)? + call.arg::<i64>(1)?))
        });
        registry.register_fn("mypkg.mod.fails", |_, _| anyhow::bail!("bad input"));
        registry.register_fn("mypkg.mod.panics", |_, _| panic!("kaboom"));
        registry.register_fn("hello", |_, _| Ok(json!("world")));
        registry
    }

    #[tokio::test]
    async fn test_result_written_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("sink.json");
        let payload = Payload::new("mypkg.mod.fn")
            .with_arg(1)
            .with_arg(2)
            .with_output(&output);

        let record = dispatch(&registry(), &ExecutionContext::new(), &payload).await;

        assert_eq!(record, SinkRecord::Result(json!(3)));
        let written: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written, json!({ "result": 3 }));
    }

    #[tokio::test]
    async fn test_global_function() {
        let payload = Payload::new("hello");
        let record = dispatch(&registry(), &ExecutionContext::new(), &payload).await;
        assert_eq!(record.result(), Some(&json!("world")));
    }

    #[tokio::test]
    async fn test_missing_module_reports_import_failure() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("sink.json");
        let payload = Payload::new("missing.mod.fn").with_output(&output);

        dispatch(&registry(), &ExecutionContext::new(), &payload).await;

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        let message = written["error"]["message"].as_str().unwrap();
        assert!(message.contains("No module named 'missing.mod'"), "{message}");
        assert!(!written["error"]["trace"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_and_panic_are_captured() {
        let ctx = ExecutionContext::new();
        let failed = dispatch(&registry(), &ctx, &Payload::new("mypkg.mod.fails")).await;
        assert!(failed.error().unwrap().trace.contains("bad input"));

        let panicked = dispatch(&registry(), &ctx, &Payload::new("mypkg.mod.panics")).await;
        assert!(panicked.error().unwrap().message.contains("kaboom"));

        let bad_args = dispatch(&registry(), &ctx, &Payload::new("mypkg.mod.fn").with_arg("x")).await;
        assert!(bad_args.is_error());
    }

    #[tokio::test]
    async fn test_without_output_nothing_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Payload::new("mypkg.mod.fn").with_arg(1).with_arg(2);

        let record = dispatch(&registry(), &ExecutionContext::new(), &payload).await;

        assert_eq!(record.result(), Some(&json!(3)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_output_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Payload::new("hello").with_output(dir.path().join("no/such/dir/sink.json"));

        let record = dispatch(&registry(), &ExecutionContext::new(), &payload).await;
        assert_eq!(record.result(), Some(&json!("world")));
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&7_u8), "non-string panic payload");
    }
}
