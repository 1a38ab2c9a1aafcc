//! File-backed store shared by every process on a host.
//!
//! `sqlite://<path>` connection strings open (or create) an embedded
//! database file. All collections of all logical databases live in one
//! table; each row holds a document as extended JSON plus its expiry in
//! milliseconds. Writers take an immediate transaction, so the
//! check-then-insert of [`DocumentStore::insert_if_absent`] is atomic across
//! processes, not just tasks.

use super::{
    Database, Document, DocumentStore, ExtDateTime, Filter, ObjectId, StoreConnector,
    EXPIRE_AT_FIELD,
};
use crate::errors::StoreError;
use async_trait::async_trait;
use libsql::{params, Connection, TransactionBehavior};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

/// Connection string scheme handled by [`SqlConnector`].
pub const SQLITE_SCHEME: &str = "sqlite://";

/// Milliseconds a connection waits on another process's write lock.
const BUSY_TIMEOUT_MS: u64 = 10_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS mqas_documents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    db_name TEXT NOT NULL,
    collection TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    body TEXT NOT NULL,
    expire_at INTEGER,
    UNIQUE (db_name, collection, doc_id)
);
CREATE INDEX IF NOT EXISTS idx_mqas_documents_collection
    ON mqas_documents (db_name, collection, expire_at);
";

/// Runs a pragma, discarding whatever rows it reports.
async fn pragma(conn: &Connection, statement: &str) -> Result<(), StoreError> {
    let mut rows = conn.query(&format!("PRAGMA {statement}"), params![]).await?;
    while rows.next().await?.is_some() {}
    Ok(())
}

impl From<libsql::Error> for StoreError {
    fn from(err: libsql::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Column values derived from a document.
struct RowValues {
    doc_id: String,
    body: String,
    expire_at: libsql::Value,
}

impl RowValues {
    fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let id = doc
            .get("_id")
            .ok_or_else(|| StoreError::invalid_document("document has no _id"))?;
        let expire_at = doc
            .get(EXPIRE_AT_FIELD)
            .and_then(ExtDateTime::from_value)
            .map_or(libsql::Value::Null, |at| libsql::Value::Integer(at.timestamp_millis()));
        Ok(Self {
            doc_id: serde_json::to_string(id)?,
            body: serde_json::to_string(doc)?,
            expire_at,
        })
    }
}

/// One collection inside a shared database file.
#[derive(Clone)]
pub struct SqlStore {
    db: Arc<libsql::Database>,
    db_name: String,
    name: String,
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore")
            .field("db_name", &self.db_name)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SqlStore {
    async fn connect(&self) -> Result<Connection, StoreError> {
        let conn = self.db.connect()?;
        pragma(&conn, &format!("busy_timeout = {BUSY_TIMEOUT_MS}")).await?;
        Ok(conn)
    }

    /// Deletes documents whose `expireAt` has passed. Returns how many.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let conn = self.connect().await?;
        self.purge(&conn).await
    }

    async fn purge(&self, conn: &Connection) -> Result<u64, StoreError> {
        let dropped = conn
            .execute(
                "DELETE FROM mqas_documents \
                 WHERE db_name = ?1 AND collection = ?2 \
                 AND expire_at IS NOT NULL AND expire_at <= ?3",
                params![
                    self.db_name.as_str(),
                    self.name.as_str(),
                    ExtDateTime::now().timestamp_millis()
                ],
            )
            .await?;
        if dropped > 0 {
            debug!(collection = %self.name, dropped, "Purged expired documents");
        }
        Ok(dropped)
    }

    /// Live documents in insertion order, with their row keys.
    async fn live_rows(&self, conn: &Connection) -> Result<Vec<(i64, Document)>, StoreError> {
        let mut rows = conn
            .query(
                "SELECT seq, body FROM mqas_documents \
                 WHERE db_name = ?1 AND collection = ?2 \
                 AND (expire_at IS NULL OR expire_at > ?3) \
                 ORDER BY seq",
                params![
                    self.db_name.as_str(),
                    self.name.as_str(),
                    ExtDateTime::now().timestamp_millis()
                ],
            )
            .await?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next().await? {
            let seq = row.get::<i64>(0)?;
            let body = row.get::<String>(1)?;
            match serde_json::from_str::<Value>(&body)? {
                Value::Object(doc) => docs.push((seq, doc)),
                other => {
                    return Err(StoreError::invalid_document(format!(
                        "row {seq} holds {other}, not an object"
                    )))
                }
            }
        }
        Ok(docs)
    }

    async fn first_match(
        &self,
        conn: &Connection,
        filter: &Filter,
    ) -> Result<Option<(i64, Document)>, StoreError> {
        Ok(self
            .live_rows(conn)
            .await?
            .into_iter()
            .find(|(_, doc)| filter.matches(doc)))
    }

    async fn insert_row(&self, conn: &Connection, mut doc: Document) -> Result<Document, StoreError> {
        doc.entry("_id").or_insert_with(|| ObjectId::new().to_value());
        let row = RowValues::from_document(&doc)?;
        conn.execute(
            "INSERT INTO mqas_documents (db_name, collection, doc_id, body, expire_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.db_name.as_str(),
                self.name.as_str(),
                row.doc_id,
                row.body,
                row.expire_at
            ],
        )
        .await?;
        Ok(doc)
    }
}

#[async_trait]
impl DocumentStore for SqlStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, doc: Document) -> Result<Value, StoreError> {
        let conn = self.connect().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
        self.purge(&tx).await?;
        let inserted = self.insert_row(&tx, doc).await?;
        tx.commit().await?;
        trace!(collection = %self.name, "Inserted document");
        Ok(inserted.get("_id").cloned().unwrap_or(Value::Null))
    }

    async fn insert_if_absent(
        &self,
        filter: &Filter,
        doc: Document,
    ) -> Result<Option<Document>, StoreError> {
        let conn = self.connect().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
        self.purge(&tx).await?;
        if self.first_match(&tx, filter).await?.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }
        let inserted = self.insert_row(&tx, doc).await?;
        tx.commit().await?;
        Ok(Some(inserted))
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let conn = self.connect().await?;
        Ok(self
            .live_rows(&conn)
            .await?
            .into_iter()
            .filter_map(|(_, doc)| filter.matches(&doc).then_some(doc))
            .collect())
    }

    async fn update_one(&self, filter: &Filter, fields: Document) -> Result<bool, StoreError> {
        let conn = self.connect().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
        let Some((seq, mut doc)) = self.first_match(&tx, filter).await? else {
            tx.rollback().await?;
            return Ok(false);
        };
        for (key, value) in fields {
            doc.insert(key, value);
        }
        let row = RowValues::from_document(&doc)?;
        tx.execute(
            "UPDATE mqas_documents SET doc_id = ?1, body = ?2, expire_at = ?3 WHERE seq = ?4",
            params![row.doc_id, row.body, row.expire_at, seq],
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_one(&self, filter: &Filter) -> Result<bool, StoreError> {
        let conn = self.connect().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
        let Some((seq, _)) = self.first_match(&tx, filter).await? else {
            tx.rollback().await?;
            return Ok(false);
        };
        tx.execute("DELETE FROM mqas_documents WHERE seq = ?1", params![seq])
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}

/// A logical database inside a shared file.
#[derive(Clone)]
pub struct SqlDatabase {
    db: Arc<libsql::Database>,
    name: String,
    path: PathBuf,
}

impl std::fmt::Debug for SqlDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlDatabase")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqlDatabase {
    /// The database file.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Returns the concrete collection.
    #[must_use]
    pub fn sql_collection(&self, name: &str) -> SqlStore {
        SqlStore {
            db: self.db.clone(),
            db_name: self.name.clone(),
            name: name.to_string(),
        }
    }
}

impl Database for SqlDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentStore> {
        Arc::new(self.sql_collection(name))
    }
}

/// Opens `sqlite://<path>` connection strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlConnector;

impl SqlConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Opens the file named by `uri`, creating it and its schema if needed.
    pub async fn open(uri: &str, db_name: &str) -> Result<SqlDatabase, StoreError> {
        let path = uri
            .strip_prefix(SQLITE_SCHEME)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| StoreError::unsupported_scheme(uri))?;

        let db = libsql::Builder::new_local(&path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("{}: {e}", path.display())))?;
        let conn = db.connect()?;
        pragma(&conn, &format!("busy_timeout = {BUSY_TIMEOUT_MS}")).await?;
        // WAL lets readers proceed while another process holds the write lock.
        pragma(&conn, "journal_mode = WAL").await?;
        conn.execute_batch(SCHEMA).await?;

        debug!(path = %path.display(), db_name, "Opened shared database");
        Ok(SqlDatabase {
            db: Arc::new(db),
            name: db_name.to_string(),
            path,
        })
    }
}

#[async_trait]
impl StoreConnector for SqlConnector {
    async fn connect(&self, uri: &str, db_name: &str) -> Result<Arc<dyn Database>, StoreError> {
        Ok(Arc::new(Self::open(uri, db_name).await?))
    }
}
