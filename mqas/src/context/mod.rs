//! Context management for job execution.
//!
//! This module provides:
//! - The explicit per-execution key/value context
//! - The bootstrap descriptor that rehydrates a context in a new process
//! - Well-known context keys

mod bootstrap;
#[cfg(test)]
mod context_tests;
mod execution;
pub mod keys;

pub use bootstrap::{Bootstrap, BOOTSTRAP_ENV};
pub use execution::ExecutionContext;
