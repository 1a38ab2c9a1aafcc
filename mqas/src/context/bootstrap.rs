//! Serialized context handed to a freshly spawned execution environment.

use super::{keys, ExecutionContext};
use crate::config::ConnectionConfig;
use crate::store::StoreConnector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Environment variable carrying the bootstrap descriptor as JSON.
pub const BOOTSTRAP_ENV: &str = "MQAS_BOOTSTRAP";

/// Identity and connection values captured from a parent context.
///
/// The descriptor is built as literal values when the child is launched and
/// installed into the child's fresh [`ExecutionContext`] before dispatch; the
/// child never relies on inheriting the parent's memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    /// The job id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// The worker id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// The store connection string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_conn: Option<String>,
    /// The database name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    /// The shared collection name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_coll: Option<String>,
    /// The device id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl Bootstrap {
    /// Creates an empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the job id.
    #[must_use]
    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Sets the worker id.
    #[must_use]
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    /// Sets the connection string, database and collection.
    #[must_use]
    pub fn with_connection(
        mut self,
        conn: impl Into<String>,
        db_name: impl Into<String>,
        db_coll: impl Into<String>,
    ) -> Self {
        self.db_conn = Some(conn.into());
        self.db_name = Some(db_name.into());
        self.db_coll = Some(db_coll.into());
        self
    }

    /// Fills whichever of the connection string, database and collection
    /// the descriptor lacks from `connection`.
    #[must_use]
    pub fn or_connection(mut self, connection: &ConnectionConfig) -> Self {
        self.db_conn = self.db_conn.or_else(|| Some(connection.db_conn.clone()));
        self.db_name = self.db_name.or_else(|| Some(connection.db_name.clone()));
        self.db_coll = self.db_coll.or_else(|| Some(connection.db_coll.clone()));
        self
    }

    /// Sets the device id.
    #[must_use]
    pub fn with_device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Captures the well-known values of a context.
    #[must_use]
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        let text = |key: &str| ctx.get(key).and_then(|v| v.as_str()).map(String::from);
        Self {
            job_id: ctx.current_job_id(),
            worker_id: ctx.current_worker_id(),
            db_conn: text(keys::DB_CONN),
            db_name: text(keys::DB_NAME),
            db_coll: text(keys::DB_COLL),
            device_id: ctx.current_device_id(),
        }
    }

    fn entries(&self) -> [(&'static str, Option<&String>); 6] {
        [
            (keys::JOB_ID, self.job_id.as_ref()),
            (keys::WORKER_ID, self.worker_id.as_ref()),
            (keys::DB_CONN, self.db_conn.as_ref()),
            (keys::DB_NAME, self.db_name.as_ref()),
            (keys::DB_COLL, self.db_coll.as_ref()),
            (keys::DEVICE_ID, self.device_id.as_ref()),
        ]
    }

    /// Installs every present value into `ctx`.
    pub fn apply(&self, ctx: &mut ExecutionContext) {
        for (key, value) in self.entries() {
            if let Some(value) = value {
                ctx.set_value(key, value.clone());
            }
        }
    }

    /// Builds a fresh context from this descriptor.
    #[must_use]
    pub fn into_context(self, connector: Arc<dyn StoreConnector>) -> ExecutionContext {
        let mut ctx = ExecutionContext::with_connector(connector);
        self.apply(&mut ctx);
        ctx
    }

    /// Encodes the descriptor for [`BOOTSTRAP_ENV`].
    pub fn to_env_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a descriptor produced by [`Bootstrap::to_env_value`].
    pub fn from_env_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }

    /// Reads the descriptor from the process environment.
    ///
    /// A missing or malformed variable yields an empty descriptor, so a job
    /// can still run without identity.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(BOOTSTRAP_ENV) {
            Ok(raw) => Self::from_env_value(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed {}", BOOTSTRAP_ENV);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}
