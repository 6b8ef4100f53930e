use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::api::response::ApiError;
use crate::AppState;

/// Unreserved characters stay literal in the RFC 5987 `filename*` value.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Stream one file of a transfer as an attachment.
/// Route: GET /d/:id/:file_id
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((transfer_id, file_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let download = state.transfers.open_file(&transfer_id, &file_id).await?;

    let body = Body::from_stream(ReaderStream::new(download.reader));
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        download
            .record
            .mime_type
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size));

    if let Ok(value) = content_disposition(&download.record.name).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    tracing::debug!(transfer_id = %transfer_id, file_id = %file_id, size = download.size, "Serving file");
    Ok(response)
}

/// `attachment` disposition with an ASCII fallback and the percent-encoded UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        utf8_percent_encode(name, FILENAME_ENCODE_SET)
    )
}
