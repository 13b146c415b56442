//! Pipeline state persistence.
//!
//! Stores keep state records as opaque bytes keyed by pipeline id; encoding
//! is owned by [`PipelineState`](crate::state::PipelineState).

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Durable storage for pipeline state records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the stored record, or `None` if the pipeline is unknown.
    async fn load(&self, pipeline_id: &str) -> Result<Option<Vec<u8>>>;

    /// Replaces the stored record.
    async fn save(&self, pipeline_id: &str, record: &[u8]) -> Result<()>;
}

/// Stores one JSON file per pipeline in a directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Path of the record for `pipeline_id`.
    pub fn record_path(&self, pipeline_id: &str) -> Result<PathBuf> {
        if pipeline_id.is_empty()
            || pipeline_id.contains(['/', '\\', '\0'])
            || pipeline_id.starts_with('.')
        {
            return Err(Error::Store(format!("invalid pipeline id '{}'", pipeline_id)));
        }
        Ok(self.dir.join(format!("{}.json", pipeline_id)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, pipeline_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(pipeline_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Store(format!("cannot read {}: {}", path.display(), e))),
        }
    }

    async fn save(&self, pipeline_id: &str, record: &[u8]) -> Result<()> {
        let path = self.record_path(pipeline_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Replace via rename so a crash never leaves a torn record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, record).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(pipeline_id = %pipeline_id, path = ?path, "saved pipeline state");
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, pipeline_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.lock().await.get(pipeline_id).cloned())
    }

    async fn save(&self, pipeline_id: &str, record: &[u8]) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(pipeline_id.to_string(), record.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));

        assert_eq!(store.load("p-1").await.unwrap(), None);

        store.save("p-1", b"{\"a\":1}").await.unwrap();
        store.save("p-1", b"{\"a\":2}").await.unwrap();

        assert_eq!(store.load("p-1").await.unwrap(), Some(b"{\"a\":2}".to_vec()));
        assert!(!dir.path().join("state").join("p-1.json.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        assert!(store.save("../escape", b"x").await.is_err());
        assert!(store.load("a/b").await.is_err());
        assert!(store.load("").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_round_trips_bytes() {
        let store = MemoryStateStore::new();
        assert!(store.is_empty().await);

        store.save("p", b"state").await.unwrap();

        assert_eq!(store.load("p").await.unwrap(), Some(b"state".to_vec()));
        assert_eq!(store.len().await, 1);
    }
}
