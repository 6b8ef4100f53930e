use std::future::Future;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use super::mirror::MirrorFile;
use super::models::{Snapshot, Transfer};
use super::serializer::WriteSerializer;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Metadata mirror is corrupt: {0}")]
    Corrupt(String),
    #[error("Mutation aborted: {0}")]
    Aborted(String),
}

struct RepositoryInner {
    mirror: MirrorFile,
    committed: RwLock<Arc<Snapshot>>,
    writes: WriteSerializer,
}

/// Transfer metadata held in memory and mirrored to a single JSON file.
///
/// Reads see the last committed snapshot without waiting. Every mutation goes
/// through [`Repository::mutate`], which serializes it against all others and
/// persists the result before publishing it.
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

impl Clone for Repository {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Repository {
    /// Open the mirror at `path` and load its contents.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mirror = MirrorFile::open(path).await?;
        let snapshot = mirror.load().await?;
        tracing::debug!(
            path = %mirror.path().display(),
            transfers = snapshot.len(),
            "Loaded metadata mirror"
        );

        Ok(Self {
            inner: Arc::new(RepositoryInner {
                mirror,
                committed: RwLock::new(Arc::new(snapshot)),
                writes: WriteSerializer::new(),
            }),
        })
    }

    pub fn mirror_path(&self) -> &Path {
        self.inner.mirror.path()
    }

    /// The last committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(
            &self
                .inner
                .committed
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn get(&self, id: &str) -> Option<Transfer> {
        self.snapshot().get(id).cloned()
    }

    /// Apply a read-modify-write cycle exclusively.
    ///
    /// `op` receives a copy of the committed snapshot and returns the snapshot
    /// to commit along with a value for the caller. A changed snapshot is saved
    /// to the mirror and only then published; an unchanged one skips the write.
    /// If `op` or the save fails, the committed snapshot is left as it was.
    pub async fn mutate<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(Snapshot) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(Snapshot, T), E>> + Send + 'static,
        T: Send + 'static,
        E: From<StorageError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        // Spawned so a dropped caller cannot stop a commit between save and publish
        let task = tokio::spawn(async move {
            inner
                .writes
                .run_exclusive(|| async {
                    let current = Arc::clone(
                        &inner
                            .committed
                            .read()
                            .unwrap_or_else(PoisonError::into_inner),
                    );
                    let (next, value) = op(Snapshot::clone(&current)).await?;

                    if next != *current {
                        inner.mirror.save(&next).await.map_err(E::from)?;
                        *inner
                            .committed
                            .write()
                            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
                    }
                    Ok::<T, E>(value)
                })
                .await
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(E::from(StorageError::Aborted(e.to_string()))),
        }
    }

    /// Commit a new transfer.
    pub async fn insert(&self, transfer: Transfer) -> Result<(), StorageError> {
        self.mutate(move |mut snapshot| async move {
            snapshot.insert(transfer);
            Ok::<_, StorageError>((snapshot, ()))
        })
        .await
    }
}
