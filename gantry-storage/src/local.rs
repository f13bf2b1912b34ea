//! Local filesystem storage implementation.
//!
//! This is the default backend for single-node deployments: one
//! `<key>.json` file per document under a base directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::traits::{validate_document, validate_key, VirtualTableStorage};

const EXTENSION: &str = "json";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend.
    ///
    /// The base path is created lazily on first write.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Get the base path for this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn to_fs_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", key, EXTENSION))
    }
}

#[async_trait]
impl VirtualTableStorage for LocalStorage {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let fs_path = self.to_fs_path(key);
        debug!("Reading from {:?}", fs_path);

        match fs::read_to_string(&fs_path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, document), fields(key = %key, size = document.len()))]
    async fn put(&self, key: &str, document: &str) -> Result<()> {
        validate_key(key)?;
        validate_document(key, document)?;
        fs::create_dir_all(&self.base_path).await?;

        // Write-then-rename so readers never observe a torn document.
        let fs_path = self.to_fs_path(key);
        let tmp_path = self.base_path.join(format!(".{}.{}.tmp", key, EXTENSION));
        debug!("Writing {} bytes to {:?}", document.len(), fs_path);
        fs::write(&tmp_path, document).await?;
        fs::rename(&tmp_path, &fs_path).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(&format!(".{}", EXTENSION)) {
                keys.push(key.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
