//! Fixtures for tests of code that runs inside jobs.

use crate::context::{keys, ExecutionContext};
use crate::errors::StoreError;
use crate::reservation::WorkerRecord;
use crate::store::{to_document, ObjectId, SQLITE_SCHEME};
use serde_json::Value;
use std::path::Path;

/// A context wired to a fresh, uniquely named `memory://` store.
#[must_use]
pub fn memory_context() -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    ctx.set_value(keys::DB_CONN, format!("memory://test-{}", ObjectId::new()));
    ctx.set_value(keys::DB_NAME, "jobs");
    ctx.set_value(keys::DB_COLL, "jobs");
    ctx.set_value(keys::JOB_ID, ObjectId::new().to_hex());
    ctx.set_value(keys::WORKER_ID, ObjectId::new().to_hex());
    ctx
}

/// A context wired to the `sqlite://` store file at `path`, which other
/// processes can open too.
#[must_use]
pub fn sqlite_context(path: &Path) -> ExecutionContext {
    let mut ctx = memory_context();
    ctx.set_value(keys::DB_CONN, format!("{SQLITE_SCHEME}{}", path.display()));
    ctx
}

/// Inserts a live worker record into the context's collection and returns
/// its id.
pub async fn seed_worker(ctx: &ExecutionContext, id: impl Into<Value>) -> Result<Value, StoreError> {
    let Some(coll) = ctx.jobs_collection().await? else {
        return Err(StoreError::Connection("context has no jobs collection".to_string()));
    };
    coll.insert_one(to_document(&WorkerRecord::new(id))?).await
}
