use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Duration;
use dropshare::blob_store::LocalBlobStore;
use dropshare::clock::ManualClock;
use dropshare::storage::{MirrorFile, Repository};
use dropshare::sweeper::SweepStats;
use dropshare::transfers::{TransferError, TransferService, TransferSettings, UploadSource};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

struct Harness {
    dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    service: TransferService,
}

impl Harness {
    async fn new(ttl: Duration) -> Self {
        Self::with_limits(ttl, 20, 1024 * 1024).await
    }

    async fn with_limits(ttl: Duration, max_files: usize, max_file_size: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let service = build_service(dir.path(), &clock, ttl, max_files, max_file_size).await;
        Self { dir, clock, service }
    }

    fn storage_dir(&self) -> PathBuf {
        self.dir.path().join("storage")
    }

    fn metadata_file(&self) -> PathBuf {
        self.dir.path().join("data").join("transfers.json")
    }

    fn transfer_dirs(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.storage_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    async fn mirrored_ids(&self) -> Vec<String> {
        let snapshot = MirrorFile::open(self.metadata_file())
            .await
            .unwrap()
            .read()
            .await
            .unwrap();
        snapshot.transfers.keys().cloned().collect()
    }
}

async fn build_service(
    root: &Path,
    clock: &Arc<ManualClock>,
    ttl: Duration,
    max_files: usize,
    max_file_size: u64,
) -> TransferService {
    let blobs = LocalBlobStore::new(root.join("storage")).unwrap();
    let repository = Repository::open(root.join("data").join("transfers.json"))
        .await
        .unwrap();
    TransferService::new(
        repository,
        Arc::new(blobs),
        Arc::clone(clock) as _,
        TransferSettings {
            ttl,
            max_files,
            max_file_size,
        },
    )
}

fn source(name: &str, mime: Option<&str>, content: &[u8]) -> UploadSource {
    UploadSource::new(name, mime, io::Cursor::new(content.to_vec()))
}

/// Yields a few bytes and then fails like an aborted client upload.
struct BrokenStream {
    sent: bool,
}

impl AsyncRead for BrokenStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.sent {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upload interrupted",
            )));
        }
        self.sent = true;
        buf.put_slice(b"half a file");
        Poll::Ready(Ok(()))
    }
}

fn broken(name: &str) -> UploadSource {
    UploadSource::new(name, None, BrokenStream { sent: false })
}

// ============================================================================
// Creation and lookup
// ============================================================================

#[tokio::test]
async fn test_create_and_read_back() {
    let h = Harness::new(Duration::hours(1)).await;

    let created = h
        .service
        .create_transfer(vec![
            source("a.txt", Some("text/plain"), b"hello world!"),
            source("b.png", None, &[0u8; 900]),
        ])
        .await
        .unwrap();

    assert_eq!(created.files.len(), 2);
    assert_eq!(created.files[0].name, "a.txt");
    assert_eq!(created.files[0].size, Some(12));
    assert_eq!(created.files[0].mime_type.as_deref(), Some("text/plain"));
    assert_eq!(created.files[1].size, Some(900));
    assert_eq!(created.files[1].mime_type.as_deref(), Some("image/png"));
    assert_eq!(created.download_count, 0);
    assert_eq!(
        (created.expires_at - created.created_at).num_milliseconds(),
        3_600_000
    );

    let fetched = h.service.get_transfer(&created.id).await.unwrap();
    assert_eq!(fetched, created);

    let mut download = h
        .service
        .open_file(&created.id, &created.files[1].id)
        .await
        .unwrap();
    assert_eq!(download.size, 900);
    let mut content = Vec::new();
    download.reader.read_to_end(&mut content).await.unwrap();
    assert_eq!(content, vec![0u8; 900]);

    assert_eq!(h.transfer_dirs(), vec![created.id.clone()]);
    assert_eq!(h.mirrored_ids().await, vec![created.id]);
}

#[tokio::test]
async fn test_same_name_twice_keeps_both_files() {
    let h = Harness::new(Duration::hours(1)).await;

    let created = h
        .service
        .create_transfer(vec![
            source("notes.txt", None, b"one"),
            source("notes.txt", None, b"two"),
        ])
        .await
        .unwrap();

    assert_eq!(created.files.len(), 2);
    assert_ne!(created.files[0].stored_name, created.files[1].stored_name);

    for (file, expected) in created.files.iter().zip([b"one", b"two"]) {
        let mut download = h.service.open_file(&created.id, &file.id).await.unwrap();
        let mut content = Vec::new();
        download.reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, expected);
    }
}

#[tokio::test]
async fn test_unknown_transfer_is_not_found() {
    let h = Harness::new(Duration::hours(1)).await;

    assert!(matches!(
        h.service.get_transfer("does-not-exist").await,
        Err(TransferError::NotFound)
    ));
    assert!(matches!(
        h.service.get_file("does-not-exist", "nope").await,
        Err(TransferError::NotFound)
    ));
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn test_zero_ttl_is_expired_immediately() {
    let h = Harness::new(Duration::zero()).await;

    let created = h
        .service
        .create_transfer(vec![source("a.txt", None, b"a")])
        .await
        .unwrap();
    assert_eq!(created.expires_at, created.created_at);

    assert!(matches!(
        h.service.get_transfer(&created.id).await,
        Err(TransferError::NotFound)
    ));

    h.service.sweeper().sweep_once().await.unwrap();
    assert!(h.transfer_dirs().is_empty());
    assert!(h.mirrored_ids().await.is_empty());
}

#[tokio::test]
async fn test_transfer_expires_with_clock() {
    let h = Harness::new(Duration::hours(72)).await;

    let created = h
        .service
        .create_transfer(vec![source("a.txt", None, b"a")])
        .await
        .unwrap();

    h.clock.advance(Duration::hours(71));
    assert!(h.service.get_transfer(&created.id).await.is_ok());

    h.clock.advance(Duration::hours(1));
    assert!(matches!(
        h.service.get_transfer(&created.id).await,
        Err(TransferError::NotFound)
    ));
    // The lookup swept it on the way out
    assert!(h.service.repository().get(&created.id).is_none());
    assert!(h.transfer_dirs().is_empty());
}

#[tokio::test]
async fn test_sweep_keeps_live_transfers_and_is_idempotent() {
    let h = Harness::new(Duration::hours(1)).await;

    let old = h
        .service
        .create_transfer(vec![source("old.txt", None, b"old")])
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(30));
    let fresh = h
        .service
        .create_transfer(vec![source("fresh.txt", None, b"fresh")])
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(31));

    let first = h.service.sweeper().sweep_once().await.unwrap();
    assert_eq!(first.expired, 1);
    assert_eq!(first.removed, 1);
    assert_eq!(first.failed, 0);

    let second = h.service.sweeper().sweep_once().await.unwrap();
    assert_eq!(second, SweepStats::default());

    assert!(h.service.repository().get(&old.id).is_none());
    assert!(h.service.get_transfer(&fresh.id).await.is_ok());
    assert_eq!(h.transfer_dirs(), vec![fresh.id.clone()]);
    assert_eq!(h.mirrored_ids().await, vec![fresh.id]);
}

// ============================================================================
// Failed uploads leave nothing behind
// ============================================================================

#[tokio::test]
async fn test_no_sources_is_empty_upload() {
    let h = Harness::new(Duration::hours(1)).await;

    let result = h.service.create_transfer(Vec::new()).await;
    assert!(matches!(result, Err(TransferError::EmptyUpload)));
    assert!(h.transfer_dirs().is_empty());
    assert!(h.mirrored_ids().await.is_empty());
}

#[tokio::test]
async fn test_all_sources_failing_is_empty_upload() {
    let h = Harness::new(Duration::hours(1)).await;

    let result = h
        .service
        .create_transfer(vec![broken("one.bin"), broken("two.bin")])
        .await;
    assert!(matches!(result, Err(TransferError::EmptyUpload)));
    assert!(h.transfer_dirs().is_empty());
    assert!(h.mirrored_ids().await.is_empty());
}

#[tokio::test]
async fn test_failed_source_is_skipped() {
    let h = Harness::new(Duration::hours(1)).await;

    let created = h
        .service
        .create_transfer(vec![
            source("good.txt", None, b"good"),
            broken("bad.bin"),
        ])
        .await
        .unwrap();

    assert_eq!(created.files.len(), 1);
    assert_eq!(created.files[0].name, "good.txt");
    let blobs = std::fs::read_dir(h.storage_dir().join(&created.id))
        .unwrap()
        .count();
    assert_eq!(blobs, 1);
}

#[tokio::test]
async fn test_oversized_file_rejects_whole_upload() {
    let h = Harness::with_limits(Duration::hours(1), 20, 16).await;

    let result = h
        .service
        .create_transfer(vec![
            source("small.txt", None, b"fits"),
            source("big.bin", None, &[1u8; 17]),
        ])
        .await;
    assert!(matches!(result, Err(TransferError::FileTooLarge(16))));
    assert!(h.transfer_dirs().is_empty());
    assert!(h.mirrored_ids().await.is_empty());

    // Exactly at the limit is fine
    let created = h
        .service
        .create_transfer(vec![source("edge.bin", None, &[1u8; 16])])
        .await
        .unwrap();
    assert_eq!(created.files[0].size, Some(16));
}

#[tokio::test]
async fn test_too_many_files_rejects_whole_upload() {
    let h = Harness::with_limits(Duration::hours(1), 2, 1024).await;

    let result = h
        .service
        .create_transfer(vec![
            source("1.txt", None, b"1"),
            source("2.txt", None, b"2"),
            source("3.txt", None, b"3"),
        ])
        .await;
    assert!(matches!(result, Err(TransferError::TooManyFiles(2))));
    assert!(h.transfer_dirs().is_empty());
}

#[tokio::test]
async fn test_abort_discards_pending_upload() {
    let h = Harness::new(Duration::hours(1)).await;

    let mut upload = h.service.begin_upload().await.unwrap();
    let id = upload.id().to_string();
    let mut content: &[u8] = b"draft";
    upload
        .add_file(Some("draft.txt"), None, &mut content)
        .await
        .unwrap();
    assert_eq!(upload.files().len(), 1);

    // Not visible before commit
    assert!(matches!(
        h.service.get_transfer(&id).await,
        Err(TransferError::NotFound)
    ));

    upload.abort().await;
    assert!(h.transfer_dirs().is_empty());
}

// ============================================================================
// Missing blobs
// ============================================================================

#[tokio::test]
async fn test_missing_blob_reads_as_not_found() {
    let h = Harness::new(Duration::hours(1)).await;

    let created = h
        .service
        .create_transfer(vec![source("a.txt", None, b"a")])
        .await
        .unwrap();
    let file = &created.files[0];
    std::fs::remove_file(h.storage_dir().join(&created.id).join(&file.stored_name)).unwrap();

    assert!(matches!(
        h.service.get_file(&created.id, &file.id).await,
        Err(TransferError::NotFound)
    ));
    assert!(matches!(
        h.service.open_file(&created.id, &file.id).await,
        Err(TransferError::NotFound)
    ));
    // The transfer itself still resolves
    assert!(h.service.get_transfer(&created.id).await.is_ok());
}

// ============================================================================
// Durability and concurrency
// ============================================================================

#[tokio::test]
async fn test_transfers_survive_restart() {
    let h = Harness::new(Duration::hours(1)).await;

    let created = h
        .service
        .create_transfer(vec![source("a.txt", None, b"persist me")])
        .await
        .unwrap();

    let restarted = build_service(h.dir.path(), &h.clock, Duration::hours(1), 20, 1024).await;
    assert_eq!(restarted.get_transfer(&created.id).await.unwrap(), created);

    let mut download = restarted
        .open_file(&created.id, &created.files[0].id)
        .await
        .unwrap();
    let mut content = Vec::new();
    download.reader.read_to_end(&mut content).await.unwrap();
    assert_eq!(content, b"persist me");
}

#[tokio::test]
async fn test_reclaim_orphans_removes_unknown_transfer_dirs() {
    let h = Harness::new(Duration::hours(1)).await;

    let created = h
        .service
        .create_transfer(vec![source("a.txt", None, b"a")])
        .await
        .unwrap();
    let orphan = uuid::Uuid::new_v4().to_string();
    std::fs::create_dir_all(h.storage_dir().join(&orphan)).unwrap();
    std::fs::write(h.storage_dir().join(&orphan).join("x-x.bin"), b"x").unwrap();

    let reclaimed = h.service.sweeper().reclaim_orphans().await.unwrap();
    assert_eq!(reclaimed, 1);
    assert_eq!(h.transfer_dirs(), vec![created.id]);
}

#[tokio::test]
async fn test_reclaim_orphans_keeps_foreign_dirs() {
    let h = Harness::new(Duration::hours(1)).await;

    let lost_found = h.storage_dir().join("lost+found");
    std::fs::create_dir_all(&lost_found).unwrap();
    std::fs::write(lost_found.join("important"), b"keep me").unwrap();
    std::fs::create_dir_all(h.storage_dir().join("backups")).unwrap();

    let reclaimed = h.service.sweeper().reclaim_orphans().await.unwrap();
    assert_eq!(reclaimed, 0);
    assert!(lost_found.join("important").is_file());
    assert!(h.storage_dir().join("backups").is_dir());
}

#[tokio::test]
async fn test_unrepresentable_expiry_is_rejected() {
    let h = Harness::new(Duration::days(300_000 * 365)).await;

    let result = h
        .service
        .create_transfer(vec![source("a.txt", None, b"a")])
        .await;
    assert!(matches!(result, Err(TransferError::ExpiryOutOfRange)));
    assert!(h.transfer_dirs().is_empty());
    assert!(h.mirrored_ids().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_are_all_recorded() {
    let h = Arc::new(Harness::new(Duration::hours(1)).await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            let name = format!("file-{i}.txt");
            h.service
                .create_transfer(vec![source(&name, None, name.as_bytes())])
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.sort();

    assert_eq!(h.service.repository().snapshot().len(), 16);
    assert_eq!(h.mirrored_ids().await, ids);
    assert_eq!(h.transfer_dirs(), ids);
}
