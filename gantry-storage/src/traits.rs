//! Core storage trait definitions.
//!
//! The `VirtualTableStorage` trait is the persistence seam for virtual table
//! snapshots: one JSON document per logical index, addressed by index name.

use async_trait::async_trait;

use crate::error::{Result, StorageError};

/// Keyed JSON document store.
///
/// Documents are opaque JSON strings; callers own the document format.
/// Implementations must be `Send + Sync`, the ingest path writes snapshots
/// from many concurrent batches.
#[async_trait]
pub trait VirtualTableStorage: Send + Sync {
    /// Read the document stored under `key`.
    ///
    /// Returns `Ok(None)` when nothing is stored under the key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `document` under `key`, replacing any previous document.
    ///
    /// The document must be valid JSON.
    async fn put(&self, key: &str, document: &str) -> Result<()>;

    /// List every stored key, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Check whether a document exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;
}

/// Reject keys that cannot be stored as a single flat entry.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0')
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Ensure a document parses as JSON before it is persisted.
pub(crate) fn validate_document(key: &str, document: &str) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(document)
        .map(|_| ())
        .map_err(|source| StorageError::InvalidDocument {
            key: key.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("logs-generic").is_ok());
        assert!(validate_key("my-index-2.3").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("..").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[test]
    fn test_validate_document() {
        assert!(validate_document("k", r#"{"version":"1"}"#).is_ok());
        let err = validate_document("k", "{not json").unwrap_err();
        assert!(matches!(err, StorageError::InvalidDocument { .. }));
    }
}
