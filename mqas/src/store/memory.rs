//! In-process store backend with TTL expiry.
//!
//! `memory://<instance>` connection strings resolve to process-wide named
//! instances, so every context in the process that uses the same string sees
//! the same data. Nothing is shared with other processes; piped jobs that
//! reserve memory need a `sqlite://` store.

use super::{Database, Document, DocumentStore, ExtDateTime, Filter, ObjectId, StoreConnector};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Field holding a document's expiry date.
pub const EXPIRE_AT_FIELD: &str = "expireAt";

/// Connection string scheme handled by [`MemoryConnector`].
pub const MEMORY_SCHEME: &str = "memory://";

fn is_expired(doc: &Document, now: &ExtDateTime) -> bool {
    doc.get(EXPIRE_AT_FIELD)
        .and_then(ExtDateTime::from_value)
        .is_some_and(|at| at <= *now)
}

/// One collection held in memory.
///
/// Every operation first drops documents whose `expireAt` has passed, so
/// expired records are never observed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    docs: Mutex<Vec<Document>>,
}

impl MemoryStore {
    /// Creates an empty collection.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: Mutex::new(Vec::new()),
        }
    }

    /// Removes expired documents. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = ExtDateTime::now();
        let mut docs = self.docs.lock();
        let before = docs.len();
        docs.retain(|d| !is_expired(d, &now));
        before - docs.len()
    }

    /// Number of stored documents, expired ones included.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.docs.lock().len()
    }

    /// Spawns a task that purges expired documents every `interval`.
    ///
    /// The task ends once the store is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let dropped = store.purge_expired();
                if dropped > 0 {
                    debug!(collection = %store.name, dropped, "Reaped expired documents");
                }
            }
        })
    }

    fn with_live_docs<T>(&self, f: impl FnOnce(&mut Vec<Document>) -> T) -> T {
        let now = ExtDateTime::now();
        let mut docs = self.docs.lock();
        docs.retain(|d| !is_expired(d, &now));
        f(&mut docs)
    }

    fn ensure_id(doc: &mut Document) -> Value {
        doc.entry("_id")
            .or_insert_with(|| ObjectId::new().to_value())
            .clone()
    }

    fn push_unique(docs: &mut Vec<Document>, mut doc: Document) -> Result<Document, StoreError> {
        let id = Self::ensure_id(&mut doc);
        if docs.iter().any(|d| d.get("_id") == Some(&id)) {
            return Err(StoreError::Backend(format!("duplicate key _id: {id}")));
        }
        docs.push(doc.clone());
        Ok(doc)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, doc: Document) -> Result<Value, StoreError> {
        let inserted = self.with_live_docs(|docs| Self::push_unique(docs, doc))?;
        trace!(collection = %self.name, "Inserted document");
        Ok(inserted.get("_id").cloned().unwrap_or(Value::Null))
    }

    async fn insert_if_absent(
        &self,
        filter: &Filter,
        doc: Document,
    ) -> Result<Option<Document>, StoreError> {
        self.with_live_docs(|docs| {
            if docs.iter().any(|d| filter.matches(d)) {
                return Ok(None);
            }
            Self::push_unique(docs, doc).map(Some)
        })
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        Ok(self.with_live_docs(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect()))
    }

    async fn update_one(&self, filter: &Filter, fields: Document) -> Result<bool, StoreError> {
        Ok(self.with_live_docs(|docs| {
            docs.iter_mut().find(|d| filter.matches(d)).map_or(false, |doc| {
                for (key, value) in fields {
                    doc.insert(key, value);
                }
                true
            })
        }))
    }

    async fn delete_one(&self, filter: &Filter) -> Result<bool, StoreError> {
        Ok(self.with_live_docs(|docs| {
            let Some(idx) = docs.iter().position(|d| filter.matches(d)) else {
                return false;
            };
            docs.remove(idx);
            true
        }))
    }
}

/// A named set of in-memory collections.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    name: String,
    collections: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: DashMap::new(),
        }
    }

    /// Returns the concrete collection, for reaper control and inspection.
    #[must_use]
    pub fn memory_collection(&self, name: &str) -> Arc<MemoryStore> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(name)))
            .clone()
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentStore> {
        self.memory_collection(name)
    }
}

fn instances() -> &'static DashMap<String, Arc<MemoryDatabase>> {
    static INSTANCES: OnceLock<DashMap<String, Arc<MemoryDatabase>>> = OnceLock::new();
    INSTANCES.get_or_init(DashMap::new)
}

/// Resolves `memory://<instance>` connection strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryConnector;

impl MemoryConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the shared database for `uri`/`db_name`, creating it on first use.
    pub fn open(uri: &str, db_name: &str) -> Result<Arc<MemoryDatabase>, StoreError> {
        let instance = uri
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| StoreError::unsupported_scheme(uri))?;
        let key = format!("{instance}/{db_name}");
        Ok(instances()
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryDatabase::new(db_name)))
            .clone())
    }

    /// Forgets a named instance so the next connect starts empty.
    pub fn drop_instance(uri: &str) {
        if let Some(instance) = uri.strip_prefix(MEMORY_SCHEME) {
            let prefix = format!("{instance}/");
            instances().retain(|key, _| !key.starts_with(&prefix));
        }
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, uri: &str, db_name: &str) -> Result<Arc<dyn Database>, StoreError> {
        let db: Arc<dyn Database> = Self::open(uri, db_name)?;
        debug!(uri, db_name, "Opened in-memory database");
        Ok(db)
    }
}
