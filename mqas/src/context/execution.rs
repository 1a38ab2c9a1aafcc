//! The per-execution context object.

use super::keys;
use crate::config::LockConfig;
use crate::errors::StoreError;
use crate::store::{id_to_string, Database, DocumentStore, SchemeConnector, StoreConnector};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Key/value registry for one job execution plus a lazily opened store
/// connection and the reservation timing used by locks built from it.
///
/// A context is an explicit value handed by reference to every operation
/// that needs it; nothing here is global, so two contexts never observe
/// each other's values.
#[derive(Debug)]
pub struct ExecutionContext {
    values: HashMap<String, Value>,
    connector: Arc<dyn StoreConnector>,
    database: OnceCell<Arc<dyn Database>>,
    lock_config: LockConfig,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Creates an empty context that opens `memory://` and `sqlite://`
    /// stores.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(Arc::new(SchemeConnector::new()))
    }

    /// Creates an empty context using the given connector.
    #[must_use]
    pub fn with_connector(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            values: HashMap::new(),
            connector,
            database: OnceCell::new(),
            lock_config: LockConfig::default(),
        }
    }

    /// Sets the reservation timing.
    #[must_use]
    pub fn with_lock_config(mut self, config: LockConfig) -> Self {
        self.lock_config = config;
        self
    }

    /// Reservation timing for locks built from this context.
    #[must_use]
    pub fn lock_config(&self) -> &LockConfig {
        &self.lock_config
    }

    /// Returns the connector used to open the store.
    #[must_use]
    pub fn connector(&self) -> &Arc<dyn StoreConnector> {
        &self.connector
    }

    /// Sets a value, overwriting any previous one.
    ///
    /// Changing the connection string or database name drops the cached
    /// connection.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == keys::DB_CONN || key == keys::DB_NAME {
            self.database = OnceCell::new();
        }
        self.values.insert(key, value.into());
    }

    /// Gets a value, or `default` if unset.
    #[must_use]
    pub fn get_value(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }

    /// Gets a value by reference.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Checks if a key is set.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    fn get_id(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .filter(|v| !v.is_null())
            .map(id_to_string)
    }

    /// The current job id, if set.
    #[must_use]
    pub fn current_job_id(&self) -> Option<String> {
        self.get_id(keys::JOB_ID)
    }

    /// The current worker id, if set.
    #[must_use]
    pub fn current_worker_id(&self) -> Option<String> {
        self.get_id(keys::WORKER_ID)
    }

    /// The current device id, if set.
    #[must_use]
    pub fn current_device_id(&self) -> Option<String> {
        self.get_id(keys::DEVICE_ID)
    }

    /// The shared collection name, if set.
    #[must_use]
    pub fn collection_name(&self) -> Option<&str> {
        self.get_str(keys::DB_COLL)
    }

    /// Opens (once) and returns the jobs database.
    ///
    /// Returns `Ok(None)` when the connection string or database name is
    /// unset. Connection failures propagate.
    pub async fn jobs_database(&self) -> Result<Option<Arc<dyn Database>>, StoreError> {
        let (Some(conn), Some(db_name)) = (self.get_str(keys::DB_CONN), self.get_str(keys::DB_NAME))
        else {
            return Ok(None);
        };

        let db = self
            .database
            .get_or_try_init(|| async {
                debug!(db_name, "Opening jobs database");
                self.connector.connect(conn, db_name).await
            })
            .await?;
        Ok(Some(db.clone()))
    }

    /// Returns the shared jobs collection.
    ///
    /// Returns `Ok(None)` when any of the connection string, database name
    /// or collection name is unset.
    pub async fn jobs_collection(&self) -> Result<Option<Arc<dyn DocumentStore>>, StoreError> {
        let Some(coll) = self.collection_name() else {
            return Ok(None);
        };
        Ok(self.jobs_database().await?.map(|db| db.collection(coll)))
    }
}
