//! # mqas
//!
//! Runtime plumbing for the mqas distributed job queue.
//!
//! Workers on many hosts pull jobs from one shared document collection.
//! This crate makes running those jobs safe:
//!
//! - **Execution context**: per-job identity and store connection, carried
//!   into a freshly spawned process by a serialized bootstrap
//! - **Memory reservation lock**: lease-based admission that keeps workers on
//!   one host from jointly overcommitting memory, coordinated through a
//!   `sqlite://` store file every process on the host opens
//! - **Execution harness**: resolves the job function, runs it, and captures
//!   the result or error in a structured sink whatever the job does
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mqas::prelude::*;
//!
//! let registry = Arc::new(FunctionRegistry::new());
//! registry.register_fn("reports.build.run", |ctx, call| {
//!     Ok(json!({ "job": ctx.current_job_id(), "rows": call.arg::<u64>(0)? }))
//! });
//!
//! let bootstrap = Bootstrap::new().with_job_id("job-1");
//! let payload = Payload::new("reports.build.run").with_arg(10).with_output("out.json");
//! let record = Harness::new(registry).execute_embedded(&bootstrap, &payload).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod errors;
pub mod harness;
pub mod observability;
pub mod reservation;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{LockConfig, RuntimeConfig};
    pub use crate::context::{Bootstrap, ExecutionContext};
    pub use crate::errors::{HarnessError, MqasError, StoreError};
    pub use crate::harness::{
        CallArgs, FunctionRegistry, Harness, JobFunction, Payload, PipedLauncher, SinkRecord,
    };
    pub use crate::reservation::{ReservationLock, ReservationState};
    pub use crate::store::{normalize_id, DocumentStore, Filter, ObjectId, SchemeConnector};
}
