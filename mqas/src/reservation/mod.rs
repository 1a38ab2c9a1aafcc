//! Host memory admission for memory-bound job steps.
//!
//! This module provides:
//! - The reservation lock that serializes admission decisions through the
//!   shared collection and accounts memory committed by other workers
//! - Lease renewal for held reservations
//! - Host memory probes
//! - The record shapes stored in the shared collection

mod lock;
mod probe;
mod records;
mod renewal;

pub use lock::{ReservationLock, ReservationState};
#[cfg(test)]
pub use probe::MockMemoryProbe;
pub use probe::{FixedMemoryProbe, MemoryProbe, SystemMemoryProbe};
pub use records::{ReservationLockRecord, ReservationRecord, WorkerRecord};
pub use renewal::LeaseRenewal;
