//! Document store abstraction.
//!
//! This module provides:
//! - The store-facing traits the runtime coordinates through
//! - Native ids and extended JSON encoding
//! - Equality/membership filters
//! - An in-process backend with TTL expiry
//! - A file-backed backend shared between processes

mod backend;
mod connector;
pub mod ejson;
mod filter;
mod ids;
mod memory;
mod sql;

pub use backend::{Database, DocumentStore, StoreConnector};
pub use connector::SchemeConnector;
pub use ejson::ExtDateTime;
pub use filter::{Document, Filter};
pub use ids::{id_to_string, normalize_id, normalize_str, ObjectId};
pub use memory::{MemoryConnector, MemoryDatabase, MemoryStore, EXPIRE_AT_FIELD, MEMORY_SCHEME};
pub use sql::{SqlConnector, SqlDatabase, SqlStore, SQLITE_SCHEME};

/// Serializes a record into a document.
pub fn to_document<T: serde::Serialize>(record: &T) -> Result<Document, crate::errors::StoreError> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(crate::errors::StoreError::invalid_document(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Deserializes a document into a record.
pub fn from_document<T: serde::de::DeserializeOwned>(
    doc: Document,
) -> Result<T, crate::errors::StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(doc))?)
}
