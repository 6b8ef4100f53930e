//! Removal of expired transfers and orphaned blob directories.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::blob_store::BlobStore;
use crate::clock::Clock;
use crate::storage::{Repository, StorageError};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Transfers found past their expiry
    pub expired: usize,
    /// Transfers whose blobs and metadata were both removed
    pub removed: usize,
    /// Transfers kept because their directory could not be removed
    pub failed: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    repository: Repository,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    pub fn new(repository: Repository, blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            blobs,
            clock,
        }
    }

    /// Remove every transfer whose expiry has passed.
    ///
    /// Blob directories go first; a transfer's metadata is dropped only once its
    /// directory is gone, so a failed removal is retried by the next sweep.
    pub async fn sweep_once(&self) -> Result<SweepStats, StorageError> {
        let blobs = Arc::clone(&self.blobs);
        let clock = Arc::clone(&self.clock);

        let stats = self
            .repository
            .mutate(move |mut snapshot| async move {
                let mut stats = SweepStats::default();
                for id in snapshot.expired_ids(clock.now()) {
                    stats.expired += 1;
                    match blobs.remove_transfer_dir(&id).await {
                        Ok(()) => {
                            snapshot.remove(&id);
                            stats.removed += 1;
                        }
                        Err(e) => {
                            tracing::warn!(transfer_id = %id, error = %e, "Failed to remove expired transfer directory");
                            stats.failed += 1;
                        }
                    }
                }
                Ok::<_, StorageError>((snapshot, stats))
            })
            .await?;

        if stats.expired > 0 {
            tracing::info!(
                expired = stats.expired,
                removed = stats.removed,
                failed = stats.failed,
                "Swept expired transfers"
            );
        }
        Ok(stats)
    }

    /// Delete transfer directories that have no metadata entry. Directories not
    /// named like a transfer are left alone.
    ///
    /// Uploads in progress own directories that are not yet committed, so this
    /// must only run before the service starts accepting uploads.
    pub async fn reclaim_orphans(&self) -> Result<usize, StorageError> {
        let blobs = Arc::clone(&self.blobs);

        let reclaimed = self
            .repository
            .mutate(move |snapshot| async move {
                let dirs = blobs
                    .list_transfer_dirs()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

                let mut reclaimed = 0;
                // Transfer directories are always named by a UUID
                let orphans = dirs
                    .iter()
                    .filter(|d| uuid::Uuid::parse_str(d).is_ok() && !snapshot.contains(d));
                for dir in orphans {
                    match blobs.remove_transfer_dir(dir).await {
                        Ok(()) => reclaimed += 1,
                        Err(e) => {
                            tracing::warn!(transfer_id = %dir, error = %e, "Failed to remove orphaned transfer directory");
                        }
                    }
                }
                Ok::<_, StorageError>((snapshot, reclaimed))
            })
            .await?;

        if reclaimed > 0 {
            tracing::info!(reclaimed, "Reclaimed orphaned transfer directories");
        }
        Ok(reclaimed)
    }

    /// Run [`Sweeper::sweep_once`] every `interval` until the handle is aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; startup already swept.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once().await {
                    tracing::error!(error = %e, "Expiry sweep failed");
                }
            }
        })
    }
}
