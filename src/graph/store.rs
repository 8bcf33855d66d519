//! Graph persistence
//!
//! Stores hold [`GraphRecord`]s keyed by investigation id. The in-memory
//! graph converts to and from a record without loss.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::model::GraphRecord;
use crate::{Error, Result};

/// Keyed storage for graph snapshots
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Save (or overwrite) a snapshot
    async fn save(&self, id: &str, record: &GraphRecord) -> Result<()>;

    /// Load a snapshot
    async fn load(&self, id: &str) -> Result<Option<GraphRecord>>;

    /// Delete a snapshot; returns whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    records: DashMap<String, GraphRecord>,
}

impl MemoryGraphStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored snapshot count
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn save(&self, id: &str, record: &GraphRecord) -> Result<()> {
        self.records.insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<GraphRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.remove(id).is_some())
    }
}

/// One pretty-printed `<id>.json` file per snapshot
#[derive(Debug, Clone)]
pub struct JsonFileGraphStore {
    directory: PathBuf,
}

impl JsonFileGraphStore {
    /// Store rooted at `directory` (created on first save)
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Root directory
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        if !valid {
            return Err(Error::Store(format!("invalid snapshot id '{id}'")));
        }
        Ok(self.directory.join(format!("{id}.json")))
    }
}

#[async_trait]
impl GraphStore for JsonFileGraphStore {
    async fn save(&self, id: &str, record: &GraphRecord) -> Result<()> {
        let path = self.path_for(id)?;
        tokio::fs::create_dir_all(&self.directory).await?;
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, json).await?;
        debug!(path = %path.display(), "Saved graph snapshot");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<GraphRecord>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
