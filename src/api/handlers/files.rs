use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::extract::MaybeActor;
use crate::api::response::{ApiError, AppQuery, JSend};
use crate::object_store::ObjectStoreError;
use crate::signing::{BlobGrant, GrantError};
use crate::workflow::{BlobStream, Delivery, DeliveryMode};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct FileParams {
    #[serde(default)]
    pub delivery: DeliveryMode,
}

#[derive(Debug, Serialize)]
pub struct DownloadUrlResponse {
    pub download_url: String,
    pub expires_at: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Route: GET /manuscripts/:id/file?delivery=stream|url
pub async fn get_manuscript_file(
    State(state): State<Arc<AppState>>,
    MaybeActor(actor): MaybeActor,
    Path(id): Path<String>,
    AppQuery(params): AppQuery<FileParams>,
) -> Result<Response, ApiError> {
    let delivery = state
        .workflow
        .deliver_file(actor.as_ref(), &id, params.delivery)
        .await?;

    match delivery {
        Delivery::Stream(blob) => Ok(blob_response(blob, "attachment")),
        Delivery::Url(url) => Ok(JSend::success(DownloadUrlResponse {
            download_url: url.url,
            expires_at: url.expires_at.to_rfc3339(),
        })
        .into_response()),
    }
}

/// Route: GET /manuscripts/:id/thumbnail
pub async fn get_thumbnail(
    State(state): State<Arc<AppState>>,
    MaybeActor(actor): MaybeActor,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let blob = state
        .workflow
        .deliver_thumbnail(actor.as_ref(), &id)
        .await?;
    Ok(blob_response(blob, "inline"))
}

/// Serve a blob through a locally signed URL.
/// Route: GET /blobs/:key?expires&filename&content_type&signature
pub async fn serve_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    AppQuery(grant): AppQuery<BlobGrant>,
) -> Result<Response, ApiError> {
    state
        .url_signer
        .verify_blob(&key, &grant, chrono::Utc::now())
        .map_err(|e| match e {
            GrantError::Expired => ApiError::forbidden("Download link has expired"),
            GrantError::BadSignature => ApiError::forbidden("Invalid download link"),
        })?;

    let data = state.object_store.get(&key).await.map_err(|e| match e {
        ObjectStoreError::NotFound(_) => ApiError::not_found("File not found"),
        _ => ApiError::internal(format!("Failed to retrieve file: {e}")),
    })?;

    let mut response = blob_response(
        BlobStream {
            data,
            content_type: grant.content_type,
            filename: grant.filename,
        },
        "attachment",
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, no-store"),
    );
    Ok(response)
}

// ============================================================================
// Helpers
// ============================================================================

/// Build the response in one go from a fully fetched body, so a storage
/// failure can only ever surface before any header is written.
fn blob_response(blob: BlobStream, disposition: &str) -> Response {
    let length = blob.data.len() as u64;
    let mut response = (StatusCode::OK, blob.data).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        blob.content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    if let Ok(value) = content_disposition(disposition, &blob.filename).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    response
}

fn content_disposition(disposition: &str, filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!("{disposition}; filename=\"{safe}\"")
}
