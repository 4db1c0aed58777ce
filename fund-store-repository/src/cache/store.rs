//! Persistent fallback for cache snapshots.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::errors::RepositoryError;
use fund_store_shared::Document;

/// Somewhere a cache can persist its last good snapshot.
///
/// The cache saves after every successful refresh and loads when a refresh
/// fails, so readers keep being served during a repository outage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot.
    async fn save(&self, documents: &[Document]) -> Result<(), RepositoryError>;

    /// Load the stored snapshot, `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<Vec<Document>>, RepositoryError>;
}

/// Snapshot store backed by a JSON file.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save(&self, documents: &[Document]) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(documents)
            .map_err(|e| RepositoryError::snapshot_store(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RepositoryError::snapshot_store(e.to_string()))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| RepositoryError::snapshot_store(e.to_string()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| RepositoryError::snapshot_store(e.to_string()))?;

        debug!(path = %self.path.display(), documents = documents.len(), "Saved snapshot");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<Document>>, RepositoryError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RepositoryError::snapshot_store(e.to_string())),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RepositoryError::snapshot_store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("funds.json"));

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache").join("funds.json"));
        let doc = match json!({"_id": "A", "name": "Alpha"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        store.save(&[doc.clone()]).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(vec![doc]));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("funds.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let result = JsonFileStore::new(path).load().await;
        assert!(matches!(result, Err(RepositoryError::SnapshotStore(_))));
    }
}
