//! Functions every job runner ships with.

use super::registry::{CallArgs, FunctionRegistry, JobFunction};
use crate::context::ExecutionContext;
use crate::reservation::ReservationLock;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Module the builtins are registered under.
pub const BUILTINS_MODULE: &str = "mqas.builtins";

/// Registers `echo`, `context`, `sleep` and `reserve` under
/// [`BUILTINS_MODULE`].
pub fn register_builtins(registry: &FunctionRegistry) {
    registry.register_fn(&format!("{BUILTINS_MODULE}.echo"), echo);
    registry.register_fn(&format!("{BUILTINS_MODULE}.context"), context);
    registry.register(&format!("{BUILTINS_MODULE}.sleep"), Arc::new(Sleep));
    registry.register(&format!("{BUILTINS_MODULE}.reserve"), Arc::new(Reserve));
}

fn echo(_: &ExecutionContext, call: CallArgs) -> anyhow::Result<Value> {
    let (args, kwargs) = call.into_parts();
    Ok(json!({ "args": args, "kwargs": kwargs }))
}

fn context(ctx: &ExecutionContext, _: CallArgs) -> anyhow::Result<Value> {
    Ok(json!({
        "job_id": ctx.current_job_id(),
        "worker_id": ctx.current_worker_id(),
        "device_id": ctx.current_device_id(),
        "collection": ctx.collection_name(),
    }))
}

/// `seconds` from the first positional argument or the keyword.
fn seconds(call: &CallArgs) -> anyhow::Result<f64> {
    if let Some(s) = call.kwarg::<f64>("seconds")? {
        return Ok(s);
    }
    if call.args().is_empty() {
        return Ok(0.0);
    }
    call.arg(0)
}

struct Sleep;

#[async_trait]
impl JobFunction for Sleep {
    async fn call(&self, _: &ExecutionContext, call: CallArgs) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::try_from_secs_f64(seconds(&call)?)?).await;
        Ok(Value::Null)
    }
}

/// Holds `memory_mb` MB through the job's own context for `seconds`.
struct Reserve;

#[async_trait]
impl JobFunction for Reserve {
    async fn call(&self, ctx: &ExecutionContext, call: CallArgs) -> anyhow::Result<Value> {
        let memory_mb = call.kwarg::<u64>("memory_mb")?;
        let hold = Duration::try_from_secs_f64(seconds(&call)?)?;

        let mut lock = ReservationLock::from_context(ctx).await?;
        let reserved = lock.has_store() && memory_mb.is_some_and(|mb| mb > 0);
        lock.run_reserved(memory_mb, tokio::time::sleep(hold)).await?;
        Ok(json!({ "reserved": reserved, "memory_mb": memory_mb }))
    }
}
