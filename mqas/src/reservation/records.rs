//! Documents the admission protocol reads and writes.

use crate::store::ExtDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A live worker, maintained by the worker process itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// The worker id.
    #[serde(rename = "_id")]
    pub id: Value,
    /// Marker field.
    pub is_worker: bool,
}

impl WorkerRecord {
    /// Creates a worker record.
    #[must_use]
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            is_worker: true,
        }
    }
}

/// The short-lived mutual exclusion token.
///
/// At most one exists at a time; an abandoned one disappears when its
/// `expireAt` passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationLockRecord {
    /// Marker field.
    pub is_reservation_lock: bool,
    /// Always `true` while the record exists.
    pub is_locked: bool,
    /// The worker holding the mutex.
    pub worker_id: Value,
    /// When the store drops the record.
    #[serde(rename = "expireAt")]
    pub expire_at: ExtDateTime,
}

impl ReservationLockRecord {
    /// Creates a lock record held by `worker_id`.
    #[must_use]
    pub fn new(worker_id: Value, expire_at: ExtDateTime) -> Self {
        Self {
            is_reservation_lock: true,
            is_locked: true,
            worker_id,
            expire_at,
        }
    }
}

/// "Worker W holds `ram` MB for job J".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRecord {
    /// Marker field.
    pub is_reservation: bool,
    /// The holding worker.
    pub worker_id: Value,
    /// The job the memory is held for.
    pub job_id: Value,
    /// Reserved memory in MB.
    pub ram: u64,
    /// When the store drops the record unless renewed.
    #[serde(rename = "expireAt")]
    pub expire_at: ExtDateTime,
}

impl ReservationRecord {
    /// Creates a reservation record.
    #[must_use]
    pub fn new(worker_id: Value, job_id: Value, ram: u64, expire_at: ExtDateTime) -> Self {
        Self {
            is_reservation: true,
            worker_id,
            job_id,
            ram,
            expire_at,
        }
    }
}
