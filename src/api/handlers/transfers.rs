use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use futures::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::StreamReader;

use super::base_url;
use crate::api::response::{ApiError, JSend};
use crate::storage::models::Transfer;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub url: String,
    /// Milliseconds since the Unix epoch
    pub expires_at: i64,
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Serialize)]
pub struct FileLink {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub files: Vec<FileLink>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let mut upload = state.transfers.begin_upload().await?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                upload.abort().await;
                return Err(ApiError::Fail(
                    e.status(),
                    format!("Invalid multipart data: {}", e.body_text()),
                ));
            }
        };

        // Parts without a file name are form fields, not files
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let mut reader = Box::pin(StreamReader::new(field.map_err(std::io::Error::other)));
        let added = upload
            .add_file(Some(&file_name), content_type, &mut reader)
            .await;
        if let Err(e) = added {
            upload.abort().await;
            return Err(e.into());
        }
    }

    let transfer = upload.commit().await?;
    let base = base_url(&state.config, &headers);

    tracing::debug!(transfer_id = %transfer.id, files = transfer.files.len(), "Upload committed");

    Ok(JSend::success(UploadResponse {
        url: format!("{base}/t/{}", transfer.id),
        expires_at: transfer.expires_at.timestamp_millis(),
        files: transfer
            .files
            .iter()
            .map(|f| FileSummary {
                id: f.id.clone(),
                name: f.name.clone(),
                size: f.size,
            })
            .collect(),
        id: transfer.id,
    }))
}

pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JSend<TransferResponse>>, ApiError> {
    let transfer = state.transfers.get_transfer(&id).await?;
    let base = base_url(&state.config, &headers);

    Ok(JSend::success(transfer_to_response(&transfer, &base)))
}

// ============================================================================
// Helpers
// ============================================================================

fn transfer_to_response(transfer: &Transfer, base: &str) -> TransferResponse {
    TransferResponse {
        id: transfer.id.clone(),
        created_at: transfer.created_at.timestamp_millis(),
        expires_at: transfer.expires_at.timestamp_millis(),
        files: transfer
            .files
            .iter()
            .map(|f| FileLink {
                id: f.id.clone(),
                name: f.name.clone(),
                size: f.size,
                download_url: format!("{base}/d/{}/{}", transfer.id, f.id),
            })
            .collect(),
    }
}
