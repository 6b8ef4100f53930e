//! Shared test helpers for dropshare unit tests.

use std::sync::Arc;

use crate::blob_store::LocalBlobStore;
use crate::clock::ManualClock;
use crate::config::{Config, LifecycleConfig, NodeConfig, StorageConfig};
use crate::storage::Repository;
use crate::transfers::{TransferService, UploadSource};
use crate::AppState;

/// Create a test AppState over temporary directories, driven by a manual clock.
pub async fn test_state(temp_dir: &tempfile::TempDir) -> (Arc<AppState>, Arc<ManualClock>) {
    let storage_dir = temp_dir.path().join("storage");
    let metadata_file = temp_dir.path().join("data").join("transfers.json");

    let config = Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            base_url: Some("https://share.test".to_string()),
        },
        storage: StorageConfig {
            storage_dir: storage_dir.clone(),
            metadata_file: metadata_file.clone(),
        },
        lifecycle: LifecycleConfig::default(),
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
        max_files: 5,
    };

    let blobs = LocalBlobStore::new(&storage_dir).expect("Failed to create test blob store");
    let repository = Repository::open(&metadata_file)
        .await
        .expect("Failed to open test repository");
    let clock = Arc::new(ManualClock::default());
    let settings = config
        .transfer_settings()
        .expect("Test config should be valid");

    let transfers = TransferService::new(
        repository,
        Arc::new(blobs),
        Arc::clone(&clock) as _,
        settings,
    );

    (Arc::new(AppState { config, transfers }), clock)
}

/// An in-memory upload source.
pub fn source(name: &str, mime: Option<&str>, content: &[u8]) -> UploadSource {
    UploadSource::new(name, mime, std::io::Cursor::new(content.to_vec()))
}
