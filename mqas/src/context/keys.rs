//! Well-known context keys.

/// Id of the job being executed.
pub const JOB_ID: &str = "__job_id";
/// Id of the worker executing the job.
pub const WORKER_ID: &str = "__worker_id";
/// Store connection string.
pub const DB_CONN: &str = "__db_conn";
/// Store database name.
pub const DB_NAME: &str = "__db_name";
/// Shared collection name.
pub const DB_COLL: &str = "__db_coll";
/// Id of the device the worker runs on.
pub const DEVICE_ID: &str = "__device_id";
