use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One uploaded file within a transfer. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    /// Sanitized, user-visible name
    pub name: String,
    /// Blob file name inside the transfer directory
    pub stored_name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "mime")]
    pub mime_type: Option<String>,
}

/// A shareable batch of files with a single expiry time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    /// Advisory only; nothing increments it.
    #[serde(default, rename = "downloads")]
    pub download_count: u64,
    pub files: Vec<FileRecord>,
}

impl Transfer {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn file(&self, file_id: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.id == file_id)
    }
}

/// The full metadata repository, exactly as mirrored to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub transfers: BTreeMap<String, Transfer>,
}

impl Snapshot {
    pub fn get(&self, id: &str) -> Option<&Transfer> {
        self.transfers.get(id)
    }

    pub fn insert(&mut self, transfer: Transfer) {
        self.transfers.insert(transfer.id.clone(), transfer);
    }

    pub fn remove(&mut self, id: &str) -> Option<Transfer> {
        self.transfers.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transfers.contains_key(id)
    }

    /// Ids of every transfer whose expiry is at or before `now`.
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.transfers
            .values()
            .filter(|t| t.is_expired_at(now))
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
