//! Transfer lifecycle: create a transfer from uploaded files, look it up,
//! and hand out its files until it expires.

use std::sync::Arc;

use chrono::{Duration, SubsecRound};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::blob_store::{sanitize_filename, BlobStore, BlobStoreError};
use crate::clock::Clock;
use crate::storage::models::{FileRecord, Transfer};
use crate::storage::{Repository, StorageError};
use crate::sweeper::Sweeper;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("No files were uploaded")]
    EmptyUpload,
    #[error("Transfer not found or expired")]
    NotFound,
    #[error("Too many files, at most {0} are allowed per transfer")]
    TooManyFiles(usize),
    #[error("File exceeds maximum upload size of {0} bytes")]
    FileTooLarge(u64),
    #[error("Expiry time is out of range")]
    ExpiryOutOfRange,
    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobStoreError),
    #[error("Metadata storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Limits applied to every transfer.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub ttl: Duration,
    pub max_files: usize,
    pub max_file_size: u64,
}

/// One file to upload: its client-side name, declared MIME type and content.
pub struct UploadSource {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl UploadSource {
    pub fn new<R>(filename: impl Into<String>, mime_type: Option<&str>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            filename: Some(filename.into()),
            mime_type: mime_type.map(str::to_string),
            reader: Box::new(reader),
        }
    }
}

/// A file ready to be streamed to a client.
pub struct FileDownload {
    pub record: FileRecord,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
}

pub struct TransferService {
    repository: Repository,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    sweeper: Sweeper,
    settings: TransferSettings,
}

impl TransferService {
    pub fn new(
        repository: Repository,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: TransferSettings,
    ) -> Self {
        let sweeper = Sweeper::new(repository.clone(), Arc::clone(&blobs), Arc::clone(&clock));
        Self {
            repository,
            blobs,
            clock,
            sweeper,
            settings,
        }
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Start a transfer whose files are added one at a time.
    pub async fn begin_upload(&self) -> Result<PendingUpload<'_>, TransferError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.blobs.create_transfer_dir(&id).await?;
        Ok(PendingUpload {
            service: self,
            id,
            files: Vec::new(),
        })
    }

    /// Upload every source and commit them as one transfer.
    pub async fn create_transfer<I>(&self, sources: I) -> Result<Transfer, TransferError>
    where
        I: IntoIterator<Item = UploadSource>,
    {
        let mut upload = self.begin_upload().await?;
        for mut source in sources {
            let added = upload
                .add_file(
                    source.filename.as_deref(),
                    source.mime_type.take(),
                    &mut source.reader,
                )
                .await;
            if let Err(e) = added {
                upload.abort().await;
                return Err(e);
            }
        }
        upload.commit().await
    }

    /// Look up a live transfer. An expired one triggers a sweep and reads as missing.
    pub async fn get_transfer(&self, id: &str) -> Result<Transfer, TransferError> {
        let transfer = self.repository.get(id).ok_or(TransferError::NotFound)?;

        if transfer.is_expired_at(self.clock.now()) {
            if let Err(e) = self.sweeper.sweep_once().await {
                tracing::warn!(transfer_id = %id, error = %e, "Inline expiry sweep failed");
            }
            return Err(TransferError::NotFound);
        }
        Ok(transfer)
    }

    /// Look up one file of a live transfer whose blob is still on disk.
    pub async fn get_file(
        &self,
        transfer_id: &str,
        file_id: &str,
    ) -> Result<FileRecord, TransferError> {
        let transfer = self.get_transfer(transfer_id).await?;
        let record = transfer
            .file(file_id)
            .cloned()
            .ok_or(TransferError::NotFound)?;

        if !self
            .blobs
            .blob_exists(&transfer.id, &record.stored_name)
            .await?
        {
            tracing::warn!(
                transfer_id = %transfer.id,
                file_id = %record.id,
                "Blob missing for live transfer"
            );
            return Err(TransferError::NotFound);
        }
        Ok(record)
    }

    /// Open one file of a live transfer for streaming.
    pub async fn open_file(
        &self,
        transfer_id: &str,
        file_id: &str,
    ) -> Result<FileDownload, TransferError> {
        let record = self.get_file(transfer_id, file_id).await?;
        let handle = match self.blobs.open_blob(transfer_id, &record.stored_name).await {
            Ok(handle) => handle,
            Err(BlobStoreError::NotFound(_)) => return Err(TransferError::NotFound),
            Err(e) => return Err(e.into()),
        };

        Ok(FileDownload {
            record,
            reader: handle.reader,
            size: handle.size,
        })
    }
}

/// A transfer whose files are being written. Nothing is visible to readers
/// until [`PendingUpload::commit`] succeeds.
pub struct PendingUpload<'a> {
    service: &'a TransferService,
    id: String,
    files: Vec<FileRecord>,
}

impl PendingUpload<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    /// Stream one file into the transfer.
    ///
    /// A source that fails mid-stream is skipped and `Ok(None)` returned; disk
    /// errors and limit violations are returned as errors and leave the upload
    /// for the caller to abort.
    pub async fn add_file(
        &mut self,
        filename: Option<&str>,
        declared_mime: Option<String>,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Option<FileRecord>, TransferError> {
        let settings = &self.service.settings;
        if self.files.len() >= settings.max_files {
            return Err(TransferError::TooManyFiles(settings.max_files));
        }

        let name = sanitize_filename(filename.unwrap_or_default());
        let mut limited = source.take(settings.max_file_size.saturating_add(1));
        let stored = match self
            .service
            .blobs
            .write_blob(&self.id, &name, &mut limited)
            .await
        {
            Ok(stored) => stored,
            Err(BlobStoreError::Source(e)) => {
                tracing::warn!(transfer_id = %self.id, file_name = %name, error = %e, "Skipping file whose upload stream failed");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if stored.size > settings.max_file_size {
            self.service
                .blobs
                .remove_blob(&self.id, &stored.stored_name)
                .await?;
            return Err(TransferError::FileTooLarge(settings.max_file_size));
        }

        let mime_type = declared_mime
            .filter(|m| !m.trim().is_empty())
            .or_else(|| mime_guess::from_path(&name).first().map(|m| m.to_string()));

        let record = FileRecord {
            id: stored.file_id,
            name,
            stored_name: stored.stored_name,
            size: Some(stored.size),
            mime_type,
        };
        self.files.push(record.clone());
        Ok(Some(record))
    }

    /// Commit the transfer. With no files the directory is discarded instead.
    pub async fn commit(self) -> Result<Transfer, TransferError> {
        if self.files.is_empty() {
            self.abort().await;
            return Err(TransferError::EmptyUpload);
        }

        let created_at = self.service.clock.now().trunc_subsecs(3);
        let Some(expires_at) = created_at.checked_add_signed(self.service.settings.ttl) else {
            self.abort().await;
            return Err(TransferError::ExpiryOutOfRange);
        };
        let transfer = Transfer {
            id: self.id.clone(),
            created_at,
            expires_at,
            download_count: 0,
            files: self.files.clone(),
        };

        let inserted = self.service.repository.insert(transfer.clone()).await;
        if let Err(e) = inserted {
            self.abort().await;
            return Err(e.into());
        }

        tracing::debug!(
            transfer_id = %transfer.id,
            files = transfer.files.len(),
            expires_at = %transfer.expires_at,
            "Created transfer"
        );
        Ok(transfer)
    }

    /// Discard the upload and everything written so far.
    pub async fn abort(self) {
        if let Err(e) = self.service.blobs.remove_transfer_dir(&self.id).await {
            tracing::warn!(transfer_id = %self.id, error = %e, "Failed to remove abandoned transfer directory");
        }
    }
}
