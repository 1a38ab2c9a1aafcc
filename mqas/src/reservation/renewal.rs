//! Background refresh of a held reservation's lease.

use crate::cancellation::CancellationToken;
use crate::store::{Document, DocumentStore, ExtDateTime, Filter, EXPIRE_AT_FIELD};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running lease renewal task.
///
/// The task pushes the reservation's `expireAt` to `now + lease` right away
/// and then once per `interval` until stopped. Refresh failures are logged
/// and the loop carries on. Dropping the handle aborts the task.
#[derive(Debug)]
pub struct LeaseRenewal {
    reservation_id: Value,
    token: Arc<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl LeaseRenewal {
    /// Starts renewing `reservation_id` on the current runtime.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        reservation_id: Value,
        lease: Duration,
        interval: Duration,
    ) -> Self {
        let token = Arc::new(CancellationToken::new());
        let handle = tokio::spawn(renew_loop(
            store,
            reservation_id.clone(),
            lease,
            interval,
            token.clone(),
        ));
        Self {
            reservation_id,
            token,
            handle: Some(handle),
        }
    }

    /// The reservation being renewed.
    #[must_use]
    pub fn reservation_id(&self) -> &Value {
        &self.reservation_id
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the task and waits up to `join_timeout` for it to exit,
    /// aborting it otherwise. Returns whether it exited on its own.
    pub async fn stop(mut self, join_timeout: Duration) -> bool {
        self.token.cancel("reservation released");
        let Some(mut handle) = self.handle.take() else {
            return true;
        };
        if tokio::time::timeout(join_timeout, &mut handle).await.is_ok() {
            true
        } else {
            warn!(reservation_id = %self.reservation_id, "Lease renewal did not stop in time, aborting");
            handle.abort();
            false
        }
    }
}

impl Drop for LeaseRenewal {
    fn drop(&mut self) {
        self.token.cancel("renewal dropped");
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn renew_loop(
    store: Arc<dyn DocumentStore>,
    reservation_id: Value,
    lease: Duration,
    interval: Duration,
    token: Arc<CancellationToken>,
) {
    let filter = Filter::by_id(reservation_id.clone());
    loop {
        let mut fields = Document::new();
        fields.insert(EXPIRE_AT_FIELD.to_string(), ExtDateTime::after(lease).into());
        match store.update_one(&filter, fields).await {
            Ok(true) => debug!(reservation_id = %reservation_id, "Renewed reservation lease"),
            Ok(false) => warn!(reservation_id = %reservation_id, "Reservation to renew is gone"),
            Err(e) => warn!(reservation_id = %reservation_id, error = %e, "Reservation renewal failed"),
        }

        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    debug!(reservation_id = %reservation_id, "Lease renewal stopped");
}
