mod local;

pub use local::LocalBlobStore;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Maximum number of characters kept from a user-supplied file name.
pub const MAX_NAME_CHARS: usize = 180;

/// Maximum number of bytes of the sanitized name carried into a stored blob name.
const MAX_STORED_SUFFIX_BYTES: usize = 180;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upload stream failed: {0}")]
    Source(std::io::Error),
    #[error("Blob not found: {0}")]
    NotFound(String),
    #[error("Invalid blob key: {0}")]
    InvalidKey(String),
}

/// Result of streaming one upload to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub file_id: String,
    pub stored_name: String,
    /// Bytes actually written, never the size the client declared.
    pub size: u64,
}

/// An open blob ready to be streamed back to a client.
pub struct BlobHandle {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
}

impl std::fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobHandle")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Per-transfer blob directories.
///
/// Each transfer owns one directory named by its id; each uploaded file is one
/// blob in that directory named `{file_id}-{sanitized name}`. Blobs carry no
/// meaning without the metadata repository.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create the directory for a transfer. Succeeds if it already exists.
    async fn create_transfer_dir(&self, transfer_id: &str) -> Result<PathBuf, BlobStoreError>;

    /// Stream `source` into a new blob inside the transfer's directory.
    async fn write_blob(
        &self,
        transfer_id: &str,
        original_name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<StoredBlob, BlobStoreError>;

    /// Remove a single blob. Succeeds if it is already gone.
    async fn remove_blob(&self, transfer_id: &str, stored_name: &str)
        -> Result<(), BlobStoreError>;

    /// Recursively remove a transfer's directory. Succeeds if it is already gone.
    async fn remove_transfer_dir(&self, transfer_id: &str) -> Result<(), BlobStoreError>;

    async fn blob_exists(&self, transfer_id: &str, stored_name: &str)
        -> Result<bool, BlobStoreError>;

    async fn open_blob(
        &self,
        transfer_id: &str,
        stored_name: &str,
    ) -> Result<BlobHandle, BlobStoreError>;

    /// Names of all transfer directories currently on disk.
    async fn list_transfer_dirs(&self) -> Result<Vec<String>, BlobStoreError>;
}

/// Make a user-supplied file name safe to display and to embed in a blob name.
///
/// Path separators become `_`, control characters are dropped and the result
/// is capped at [`MAX_NAME_CHARS`] characters. An empty result becomes `file`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_ascii_control())
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .take(MAX_NAME_CHARS)
        .collect();

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Build the on-disk name for a blob. Unique per file id, bounded in bytes so
/// multi-byte names stay under common file name limits.
pub fn stored_blob_name(file_id: &str, original_name: &str) -> String {
    let sanitized = sanitize_filename(original_name);
    let mut end = sanitized.len().min(MAX_STORED_SUFFIX_BYTES);
    while !sanitized.is_char_boundary(end) {
        end -= 1;
    }
    format!("{file_id}-{}", &sanitized[..end])
}

/// Reject anything that could escape the directory it is joined onto.
fn validate_key(key: &str) -> Result<(), BlobStoreError> {
    if key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0'])
    {
        return Err(BlobStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
