use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::models::{Snapshot, Transfer};
use super::repository::StorageError;

/// Loosely typed view of the mirror, so one bad entry does not cost the rest.
#[derive(Deserialize)]
struct RawMirror {
    #[serde(default)]
    transfers: BTreeMap<String, serde_json::Value>,
}

/// The single JSON file that durably mirrors the metadata repository.
#[derive(Debug, Clone)]
pub struct MirrorFile {
    path: PathBuf,
}

impl MirrorFile {
    /// Open the mirror at `path`, creating it with an empty snapshot if absent.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mirror = Self { path };
        if !fs::try_exists(&mirror.path).await? {
            mirror.save(&Snapshot::default()).await?;
        }
        Ok(mirror)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and strictly parse the mirror.
    pub async fn read(&self) -> Result<Snapshot, StorageError> {
        let raw = fs::read(&self.path).await?;
        let mirror: RawMirror =
            serde_json::from_slice(&raw).map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let mut snapshot = Snapshot::default();
        for (key, value) in mirror.transfers {
            let transfer: Transfer = match serde_json::from_value(value) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(transfer_id = %key, error = %e, "Dropping unreadable transfer entry");
                    continue;
                }
            };
            if transfer.id != key || transfer.files.is_empty() {
                tracing::warn!(transfer_id = %key, "Dropping malformed transfer entry");
                continue;
            }
            snapshot.insert(transfer);
        }
        Ok(snapshot)
    }

    /// Load the mirror for startup. A corrupt file degrades to an empty snapshot.
    pub async fn load(&self) -> Result<Snapshot, StorageError> {
        match self.read().await {
            Ok(snapshot) => Ok(snapshot),
            Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let snapshot = Snapshot::default();
                self.save(&snapshot).await?;
                Ok(snapshot)
            }
            Err(StorageError::Corrupt(reason)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    reason = %reason,
                    "Metadata mirror is corrupt, starting with no transfers"
                );
                Ok(Snapshot::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Atomically replace the mirror with `snapshot`.
    ///
    /// The new content is written and synced to a temporary file beside the
    /// mirror, then renamed over it. A crash at any point leaves either the old
    /// or the new document on disk, never a mix.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "transfers.json".to_string());
        let temp_path = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        if let Err(e) = write_synced(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}
