//! The memory reservation lock.

use super::probe::{FixedMemoryProbe, MemoryProbe, SystemMemoryProbe};
use super::records::{ReservationLockRecord, ReservationRecord};
use super::renewal::LeaseRenewal;
use crate::config::LockConfig;
use crate::context::ExecutionContext;
use crate::errors::StoreError;
use crate::store::{
    id_to_string, normalize_str, to_document, Document, DocumentStore, ExtDateTime, Filter,
    EXPIRE_AT_FIELD,
};
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a [`ReservationLock`].
///
/// There is no failed state: an attempt that is not granted goes back to
/// `Acquiring` after the retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    /// Never acquired.
    Idle,
    /// Waiting for the mutex or for capacity.
    Acquiring,
    /// Holding a reservation whose lease is being renewed.
    Reserved,
    /// Released; acquiring again starts a new cycle.
    Released,
}

/// Admission control for memory-bound work on one host.
///
/// Workers sharing a host agree on committed memory through the shared
/// collection alone:
///
/// 1. Take the mutex by inserting the single `is_reservation_lock` record.
///    Only one concurrent caller succeeds; the rest retry after a delay.
/// 2. While holding it, sum `ram` over reservations of every *other* live
///    worker and compare `available - committed` with the request.
/// 3. If it fits, create or update this worker's reservation. The mutex
///    record is deleted whatever happened.
///
/// A granted reservation is kept alive by a [`LeaseRenewal`] until
/// [`ReservationLock::release`]. If the worker dies the lease simply expires.
///
/// # Example
///
/// ```rust,ignore
/// let mut lock = ReservationLock::from_context(&ctx).await?;
/// let out = lock.run_reserved(Some(2048), train_model()).await?;
/// ```
pub struct ReservationLock {
    store: Option<Arc<dyn DocumentStore>>,
    worker_id: Option<String>,
    job_id: Option<String>,
    config: LockConfig,
    probe: Arc<dyn MemoryProbe>,
    memory_mb: Option<u64>,
    reservation_id: Option<Value>,
    state: ReservationState,
    renewal: Option<LeaseRenewal>,
}

impl ReservationLock {
    /// Creates a lock over `store`. Without a store every operation is a
    /// no-op.
    #[must_use]
    pub fn new(store: Option<Arc<dyn DocumentStore>>) -> Self {
        Self {
            store,
            worker_id: None,
            job_id: None,
            config: LockConfig::default(),
            probe: Arc::new(SystemMemoryProbe::new()),
            memory_mb: None,
            reservation_id: None,
            state: ReservationState::Idle,
            renewal: None,
        }
    }

    /// Creates a lock for the job and worker recorded in `ctx`, with the
    /// context's reservation timing.
    pub async fn from_context(ctx: &ExecutionContext) -> Result<Self, StoreError> {
        let store = ctx.jobs_collection().await?;
        let mut lock = Self::new(store).with_config(ctx.lock_config().clone());
        lock.worker_id = ctx.current_worker_id();
        lock.job_id = ctx.current_job_id();
        Ok(lock)
    }

    /// Sets the worker id.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Sets the job id.
    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Sets the protocol timing. A configured memory limit replaces the
    /// host probe with a fixed budget.
    #[must_use]
    pub fn with_config(mut self, config: LockConfig) -> Self {
        if let Some(limit) = config.memory_limit_mb {
            self.probe = Arc::new(FixedMemoryProbe(limit));
        }
        self.config = config;
        self
    }

    /// The protocol timing in use.
    #[must_use]
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Sets the memory probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ReservationState {
        self.state
    }

    /// Id of the held reservation record.
    #[must_use]
    pub fn reservation_id(&self) -> Option<&Value> {
        self.reservation_id.as_ref()
    }

    /// The amount most recently requested, in MB.
    #[must_use]
    pub fn memory_mb(&self) -> Option<u64> {
        self.memory_mb
    }

    /// Whether a store is configured.
    #[must_use]
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Blocks until `memory_mb` MB are reserved for this worker.
    ///
    /// Contention and insufficient capacity are retried every
    /// `retry_delay`; store failures propagate. Calling this while already
    /// reserved updates the reservation in place.
    pub async fn acquire(&mut self, memory_mb: u64) -> Result<(), StoreError> {
        let Some(store) = self.store.clone() else {
            warn!(memory_mb, "No jobs collection configured, skipping memory reservation");
            return Ok(());
        };

        self.memory_mb = Some(memory_mb);
        self.state = ReservationState::Acquiring;
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match self.try_reserve(&store, memory_mb).await {
                Ok(true) => break,
                Ok(false) => tokio::time::sleep(self.config.retry_delay()).await,
                Err(e) => {
                    self.state = self.settled_state();
                    return Err(e);
                }
            }
        }

        self.state = ReservationState::Reserved;
        self.start_renewal(store);
        info!(
            memory_mb,
            attempts,
            worker_id = self.worker_id.as_deref().unwrap_or_default(),
            job_id = self.job_id.as_deref().unwrap_or_default(),
            "Memory reserved"
        );
        Ok(())
    }

    /// Makes a single admission attempt. Returns whether it was granted.
    pub async fn try_acquire(&mut self, memory_mb: u64) -> Result<bool, StoreError> {
        let Some(store) = self.store.clone() else {
            warn!(memory_mb, "No jobs collection configured, skipping memory reservation");
            return Ok(true);
        };

        self.memory_mb = Some(memory_mb);
        let granted = self.try_reserve(&store, memory_mb).await?;
        if granted {
            self.state = ReservationState::Reserved;
            self.start_renewal(store);
        }
        Ok(granted)
    }

    /// Stops renewal and deletes the reservation. Safe to call repeatedly
    /// or without a prior acquire.
    pub async fn release(&mut self) -> Result<(), StoreError> {
        if let Some(renewal) = self.renewal.take() {
            renewal.stop(self.config.release_join_timeout()).await;
        }
        if self.state != ReservationState::Idle {
            self.state = ReservationState::Released;
        }

        let Some(reservation_id) = self.reservation_id.take() else {
            return Ok(());
        };
        let Some(store) = &self.store else {
            warn!("No jobs collection configured, nothing to release");
            return Ok(());
        };

        store.delete_one(&Filter::by_id(reservation_id.clone())).await?;
        info!(reservation_id = %reservation_id, "Memory reservation released");
        Ok(())
    }

    /// Runs `work` while holding `memory_mb` MB.
    ///
    /// The reservation is released when `work` completes, fails or panics;
    /// a panic is resumed after the release. `None` or `Some(0)` runs `work`
    /// without reserving anything.
    pub async fn run_reserved<F, T>(
        &mut self,
        memory_mb: Option<u64>,
        work: F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = T>,
    {
        let Some(memory_mb) = memory_mb.filter(|mb| *mb > 0) else {
            return Ok(work.await);
        };

        self.acquire(memory_mb).await?;
        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        let released = self.release().await;
        match outcome {
            Ok(value) => released.map(|()| value),
            Err(panic) => {
                if let Err(e) = released {
                    warn!(error = %e, "Release after panic failed");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    fn settled_state(&self) -> ReservationState {
        if self.reservation_id.is_some() {
            ReservationState::Reserved
        } else {
            ReservationState::Idle
        }
    }

    fn id_value(id: Option<&str>) -> Value {
        id.map_or(Value::Null, |id| normalize_str(Some(id)))
    }

    /// One mutex + capacity check cycle.
    async fn try_reserve(
        &mut self,
        store: &Arc<dyn DocumentStore>,
        memory_mb: u64,
    ) -> Result<bool, StoreError> {
        let worker = Self::id_value(self.worker_id.as_deref());
        let record = ReservationLockRecord::new(
            worker.clone(),
            ExtDateTime::after(self.config.mutex_ttl()),
        );
        let Some(mutex) = store
            .insert_if_absent(&Filter::new().eq("is_reservation_lock", true), to_document(&record)?)
            .await?
        else {
            debug!(memory_mb, "Reservation mutex busy");
            return Ok(false);
        };
        let mutex_id = mutex.get("_id").cloned().unwrap_or(Value::Null);

        let outcome = self.check_and_commit(store, worker, memory_mb).await;

        if let Err(e) = store.delete_one(&Filter::by_id(mutex_id)).await {
            warn!(error = %e, "Failed to delete reservation mutex, leaving it to expire");
        }
        outcome
    }

    #[allow(clippy::cast_precision_loss)]
    async fn check_and_commit(
        &mut self,
        store: &Arc<dyn DocumentStore>,
        worker: Value,
        memory_mb: u64,
    ) -> Result<bool, StoreError> {
        let available = self.probe.available_mb();

        let me = self.worker_id.as_deref();
        let others: Vec<Value> = store
            .find(&Filter::new().eq("is_worker", true))
            .await?
            .into_iter()
            .filter_map(|mut w| w.remove("_id"))
            .filter(|id| me.map_or(true, |me| id_to_string(id) != me))
            .collect();

        let committed: f64 = if others.is_empty() {
            0.0
        } else {
            store
                .find(&Filter::new().eq("is_reservation", true).is_in("worker_id", others))
                .await?
                .iter()
                .filter_map(|r| r.get("ram").and_then(Value::as_f64))
                .sum()
        };

        if (available as f64) - committed < memory_mb as f64 {
            debug!(
                available_mb = available,
                committed_mb = committed,
                requested_mb = memory_mb,
                "Not enough memory to reserve"
            );
            return Ok(false);
        }

        let job = Self::id_value(self.job_id.as_deref());
        let expire_at = ExtDateTime::after(self.config.timeout());
        let own = store
            .find_one(&Filter::new().eq("is_reservation", true).eq("worker_id", worker.clone()))
            .await?;

        let reservation_id = match own.and_then(|mut doc| doc.remove("_id")) {
            Some(id) => {
                let mut fields = Document::new();
                fields.insert("ram".to_string(), memory_mb.into());
                fields.insert("job_id".to_string(), job);
                fields.insert(EXPIRE_AT_FIELD.to_string(), expire_at.into());
                store.update_one(&Filter::by_id(id.clone()), fields).await?;
                id
            }
            None => {
                let record = ReservationRecord::new(worker, job, memory_mb, expire_at);
                store.insert_one(to_document(&record)?).await?
            }
        };

        self.reservation_id = Some(reservation_id);
        Ok(true)
    }

    fn start_renewal(&mut self, store: Arc<dyn DocumentStore>) {
        let Some(reservation_id) = self.reservation_id.clone() else {
            return;
        };
        if let Some(current) = &self.renewal {
            if current.reservation_id() == &reservation_id && !current.is_finished() {
                return;
            }
        }
        self.renewal = Some(LeaseRenewal::spawn(
            store,
            reservation_id,
            self.config.timeout(),
            self.config.renewal_interval(),
        ));
    }
}

impl std::fmt::Debug for ReservationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationLock")
            .field("worker_id", &self.worker_id)
            .field("job_id", &self.job_id)
            .field("state", &self.state)
            .field("memory_mb", &self.memory_mb)
            .field("reservation_id", &self.reservation_id)
            .finish_non_exhaustive()
    }
}

impl Drop for ReservationLock {
    fn drop(&mut self) {
        drop(self.renewal.take());
        let (Some(reservation_id), Some(store)) = (self.reservation_id.take(), self.store.clone())
        else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.delete_one(&Filter::by_id(reservation_id.clone())).await {
                        warn!(reservation_id = %reservation_id, error = %e, "Release on drop failed");
                    }
                });
            }
            Err(_) => {
                warn!(reservation_id = %reservation_id, "No runtime to release on drop, reservation will expire");
            }
        }
    }
}
