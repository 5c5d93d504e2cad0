/// Repository layer for the persisted configuration entry
use crate::domain::EntryData;
use crate::errors::StoreError;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

/// Holds the single configuration entry, in memory and as a JSON file.
///
/// Every write replaces the whole record: the file is written to a sibling
/// temp path and renamed into place before the in-memory copy is swapped.
pub struct EntryStore {
    path: PathBuf,
    entry: RwLock<Option<EntryData>>,
}

impl EntryStore {
    /// Open the store, loading an existing entry if the file exists
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entry = match tokio::fs::read(&path).await {
            Ok(bytes) => Some(serde_json::from_slice::<EntryData>(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(entry) = &entry {
            info!(
                "Loaded configuration entry for {} ({} aircraft)",
                entry.username,
                entry.airplanes.len()
            );
        }
        Ok(Self {
            path,
            entry: RwLock::new(entry),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current entry, if one is configured
    pub async fn get(&self) -> Option<EntryData> {
        self.entry.read().await.clone()
    }

    /// Replace the whole entry
    pub async fn replace(&self, entry: EntryData) -> Result<(), StoreError> {
        let mut slot = self.entry.write().await;
        self.persist(&entry).await?;
        *slot = Some(entry);
        Ok(())
    }

    /// Read-clone-modify-replace the stored entry
    pub async fn update<F>(&self, f: F) -> Result<EntryData, StoreError>
    where
        F: FnOnce(&mut EntryData),
    {
        let mut slot = self.entry.write().await;
        let mut entry = slot.clone().ok_or(StoreError::Missing)?;
        f(&mut entry);
        self.persist(&entry).await?;
        *slot = Some(entry.clone());
        Ok(entry)
    }

    async fn persist(&self, entry: &EntryData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entry)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
