//! Comprehensive tests for context module.

#[cfg(test)]
mod tests {
    use crate::context::{keys, Bootstrap, ExecutionContext};
    use crate::errors::StoreError;
    use crate::store::{Filter, MemoryConnector, ObjectId};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn memory_uri() -> String {
        format!("memory://ctx-{}", ObjectId::new())
    }

    fn connected(uri: &str) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.set_value(keys::DB_CONN, uri);
        ctx.set_value(keys::DB_NAME, "jobs");
        ctx.set_value(keys::DB_COLL, "jobs");
        ctx
    }

    #[test]
    fn test_get_value_default() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.get_value("missing", json!(5)), json!(5));
        assert!(ctx.get("missing").is_none());
    }

    #[test]
    fn test_set_value_overwrites() {
        let mut ctx = ExecutionContext::new();
        ctx.set_value("k", 1);
        ctx.set_value("k", 2);
        assert_eq!(ctx.get_value("k", Value::Null), json!(2));
        assert_eq!(ctx.keys(), vec!["k".to_string()]);
    }

    #[test]
    fn test_contexts_are_isolated() {
        let mut a = ExecutionContext::new();
        let b = ExecutionContext::new();
        a.set_value(keys::JOB_ID, "job-1");

        assert_eq!(a.current_job_id().as_deref(), Some("job-1"));
        assert!(b.current_job_id().is_none());
    }

    #[test]
    fn test_identity_accessors() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.current_job_id().is_none());
        assert!(ctx.current_worker_id().is_none());

        let worker = ObjectId::new();
        ctx.set_value(keys::WORKER_ID, worker.to_value());
        ctx.set_value(keys::DEVICE_ID, "dev-1");
        ctx.set_value(keys::JOB_ID, Value::Null);

        assert_eq!(ctx.current_worker_id(), Some(worker.to_hex()));
        assert_eq!(ctx.current_device_id().as_deref(), Some("dev-1"));
        assert!(ctx.current_job_id().is_none());
    }

    #[tokio::test]
    async fn test_jobs_collection_absent_without_keys() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.jobs_database().await.unwrap().is_none());

        ctx.set_value(keys::DB_CONN, memory_uri());
        ctx.set_value(keys::DB_NAME, "jobs");
        assert!(ctx.jobs_database().await.unwrap().is_some());
        assert!(ctx.jobs_collection().await.unwrap().is_none());
    }

    #[test]
    fn test_jobs_database_from_sync_code() {
        let ctx = connected(&memory_uri());
        let db = tokio_test::block_on(ctx.jobs_database()).unwrap().unwrap();
        assert_eq!(db.name(), "jobs");
    }

    #[tokio::test]
    async fn test_jobs_collection_is_shared_store() {
        let uri = memory_uri();
        let a = connected(&uri);
        let b = connected(&uri);

        let coll_a = a.jobs_collection().await.unwrap().unwrap();
        coll_a
            .insert_one(json!({ "is_worker": true }).as_object().cloned().unwrap())
            .await
            .unwrap();

        let coll_b = b.jobs_collection().await.unwrap().unwrap();
        assert_eq!(coll_b.count(&Filter::new().eq("is_worker", true)).await.unwrap(), 1);
        assert_eq!(coll_b.name(), "jobs");
    }

    #[tokio::test]
    async fn test_database_is_cached_until_connection_changes() {
        let uri = memory_uri();
        let mut ctx = connected(&uri);

        let first = ctx.jobs_database().await.unwrap().unwrap();
        let second = ctx.jobs_database().await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        ctx.set_value(keys::DB_NAME, "other");
        let third = ctx.jobs_database().await.unwrap().unwrap();
        assert_eq!(third.name(), "other");
    }

    #[tokio::test]
    async fn test_connection_failure_propagates() {
        let mut ctx = ExecutionContext::new();
        ctx.set_value(keys::DB_CONN, "mongodb://localhost:27017");
        ctx.set_value(keys::DB_NAME, "jobs");
        ctx.set_value(keys::DB_COLL, "jobs");

        let err = ctx.jobs_collection().await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_bootstrap_round_trip_through_env_value() {
        let boot = Bootstrap::new()
            .with_job_id("job-1")
            .with_worker_id("worker-1")
            .with_connection("memory://x", "jobs", "queue")
            .with_device_id("device-1");

        let encoded = boot.to_env_value().unwrap();
        let decoded = Bootstrap::from_env_value(&encoded).unwrap();
        assert_eq!(decoded, boot);
    }

    #[test]
    fn test_bootstrap_rehydrates_fresh_context() {
        let mut parent = ExecutionContext::new();
        parent.set_value(keys::JOB_ID, "job-9");
        parent.set_value(keys::WORKER_ID, "worker-9");
        parent.set_value(keys::DB_CONN, "memory://boot");
        parent.set_value(keys::DB_NAME, "jobs");
        parent.set_value(keys::DB_COLL, "jobs");
        parent.set_value("unrelated", "not carried");

        let boot = Bootstrap::from_context(&parent);
        let child = boot.into_context(Arc::new(MemoryConnector::new()));

        assert_eq!(child.current_job_id().as_deref(), Some("job-9"));
        assert_eq!(child.current_worker_id().as_deref(), Some("worker-9"));
        assert_eq!(child.collection_name(), Some("jobs"));
        assert!(child.get("unrelated").is_none());
        assert!(child.current_device_id().is_none());
    }

    #[test]
    fn test_empty_bootstrap_serializes_to_empty_object() {
        assert_eq!(Bootstrap::new().to_env_value().unwrap(), "{}");
        assert_eq!(Bootstrap::from_env_value("{}").unwrap(), Bootstrap::new());
    }
}
