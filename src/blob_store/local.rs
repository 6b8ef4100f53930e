use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::{stored_blob_name, validate_key, BlobHandle, BlobStore, BlobStoreError, StoredBlob};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Blob directories on the local filesystem.
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn transfer_path(&self, transfer_id: &str) -> Result<PathBuf, BlobStoreError> {
        validate_key(transfer_id)?;
        Ok(self.base_path.join(transfer_id))
    }

    fn blob_path(&self, transfer_id: &str, stored_name: &str) -> Result<PathBuf, BlobStoreError> {
        validate_key(stored_name)?;
        Ok(self.transfer_path(transfer_id)?.join(stored_name))
    }
}

/// Copy until the source is exhausted, keeping read and write failures apart.
async fn copy_source(
    source: &mut (dyn AsyncRead + Send + Unpin),
    file: &mut fs::File,
) -> Result<u64, BlobStoreError> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = source.read(&mut buf).await.map_err(BlobStoreError::Source)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn create_transfer_dir(&self, transfer_id: &str) -> Result<PathBuf, BlobStoreError> {
        let path = self.transfer_path(transfer_id)?;
        fs::create_dir_all(&path).await?;
        Ok(path)
    }

    async fn write_blob(
        &self,
        transfer_id: &str,
        original_name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<StoredBlob, BlobStoreError> {
        let file_id = uuid::Uuid::new_v4().to_string();
        let stored_name = stored_blob_name(&file_id, original_name);
        let final_path = self.blob_path(transfer_id, &stored_name)?;
        let temp_path = self.transfer_path(transfer_id)?.join(format!(".{stored_name}.part"));

        let mut file = fs::File::create(&temp_path).await?;
        let size = match copy_source(source, &mut file).await {
            Ok(size) => size,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(transfer_id, file_id = %file_id, size, "Stored blob");

        Ok(StoredBlob {
            file_id,
            stored_name,
            size,
        })
    }

    async fn remove_blob(
        &self,
        transfer_id: &str,
        stored_name: &str,
    ) -> Result<(), BlobStoreError> {
        let path = self.blob_path(transfer_id, stored_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_transfer_dir(&self, transfer_id: &str) -> Result<(), BlobStoreError> {
        let path = self.transfer_path(transfer_id)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn blob_exists(
        &self,
        transfer_id: &str,
        stored_name: &str,
    ) -> Result<bool, BlobStoreError> {
        let path = self.blob_path(transfer_id, stored_name)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_blob(
        &self,
        transfer_id: &str,
        stored_name: &str,
    ) -> Result<BlobHandle, BlobStoreError> {
        let path = self.blob_path(transfer_id, stored_name)?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobStoreError::NotFound(format!("{transfer_id}/{stored_name}"))
            } else {
                BlobStoreError::Io(e)
            }
        })?;
        let size = file.metadata().await?.len();
        Ok(BlobHandle {
            reader: Box::new(file),
            size,
        })
    }

    async fn list_transfer_dirs(&self) -> Result<Vec<String>, BlobStoreError> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            // file_type() does not follow symlinks
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                dirs.push(name.to_string());
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}
