//! dropshare - Upload a batch of files, share one link, and let it expire
//!
//! This crate provides the transfer lifecycle store behind the service:
//! - Per-transfer blob directories with streamed, size-checked writes
//! - Transfer metadata held in memory and mirrored to one atomically replaced JSON file
//! - A FIFO write serializer so every metadata mutation is a single read-modify-write
//! - An expiry sweeper removing blobs and metadata together
//! - REST API with multipart upload and streamed downloads

pub mod api;
pub mod blob_store;
pub mod clock;
pub mod config;
pub mod storage;
pub mod sweeper;
#[cfg(test)]
pub mod testutil;
pub mod transfers;

use config::Config;
use transfers::TransferService;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub transfers: TransferService,
}
