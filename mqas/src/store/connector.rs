//! Connector that picks a backend by connection string scheme.

use super::{Database, MemoryConnector, SqlConnector, StoreConnector, MEMORY_SCHEME, SQLITE_SCHEME};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// Routes `memory://` to [`MemoryConnector`] and `sqlite://` to
/// [`SqlConnector`]. Any other scheme is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemeConnector;

impl SchemeConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StoreConnector for SchemeConnector {
    async fn connect(&self, uri: &str, db_name: &str) -> Result<Arc<dyn Database>, StoreError> {
        if uri.starts_with(MEMORY_SCHEME) {
            MemoryConnector.connect(uri, db_name).await
        } else if uri.starts_with(SQLITE_SCHEME) {
            SqlConnector.connect(uri, db_name).await
        } else {
            Err(StoreError::unsupported_scheme(uri))
        }
    }
}
