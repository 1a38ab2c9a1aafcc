//! Store-facing traits.
//!
//! The runtime only needs a handful of single-document operations, each of
//! which a backend must perform atomically with respect to its collection.

use super::{Document, Filter};
use crate::errors::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A single shared collection of schema-less documents.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// The collection name.
    fn name(&self) -> &str;

    /// Inserts a document, assigning a fresh `_id` when absent.
    ///
    /// Returns the document's `_id`.
    async fn insert_one(&self, doc: Document) -> Result<Value, StoreError>;

    /// Inserts `doc` only if no live document matches `filter`.
    ///
    /// Returns the inserted document (with its `_id`) to exactly one of any
    /// number of concurrent callers; the others get `None`.
    async fn insert_if_absent(
        &self,
        filter: &Filter,
        doc: Document,
    ) -> Result<Option<Document>, StoreError>;

    /// Returns every live document matching `filter`, in insertion order.
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Returns the first live document matching `filter`.
    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, StoreError> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Sets `fields` on the first matching document. Returns whether one matched.
    async fn update_one(&self, filter: &Filter, fields: Document) -> Result<bool, StoreError>;

    /// Deletes the first matching document. Returns whether one matched.
    async fn delete_one(&self, filter: &Filter) -> Result<bool, StoreError>;

    /// Counts live documents matching `filter`.
    async fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.find(filter).await?.len())
    }
}

/// A named database holding collections.
pub trait Database: Send + Sync + std::fmt::Debug {
    /// The database name.
    fn name(&self) -> &str;

    /// Returns a handle to the named collection, creating it on first use.
    fn collection(&self, name: &str) -> Arc<dyn DocumentStore>;
}

/// Opens databases from connection strings.
#[async_trait]
pub trait StoreConnector: Send + Sync + std::fmt::Debug {
    /// Connects to `uri` and selects `db_name`.
    async fn connect(&self, uri: &str, db_name: &str) -> Result<Arc<dyn Database>, StoreError>;
}
