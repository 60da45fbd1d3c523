use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::extract::{CurrentActor, MaybeActor};
use crate::api::response::{ApiError, AppJson, AppMultipart, AppQuery, JSend, JSendPaginated};
use crate::state_machine::ManuscriptStatus;
use crate::workflow::{
    ListParams, ManuscriptPatch, ManuscriptView, NewManuscript, Upload, DEFAULT_PAGE_SIZE,
};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListManuscriptsParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub status: Option<ManuscriptStatus>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct SubmitReviewRequest {
    #[serde(alias = "status")]
    pub decision: String,
    #[serde(default)]
    pub comments: String,
}

/// Parsed multipart manuscript form
#[derive(Debug, Default)]
struct ManuscriptForm {
    title: Option<String>,
    description: Option<String>,
    file: Option<Upload>,
    thumbnail: Option<Upload>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Route: POST /manuscripts
pub async fn create_manuscript(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    AppMultipart(multipart): AppMultipart,
) -> Result<(StatusCode, Json<JSend<ManuscriptView>>), ApiError> {
    let form = read_form(multipart, state.config.max_upload_size).await?;

    let manuscript = state
        .workflow
        .create(
            &actor,
            NewManuscript {
                title: form.title.unwrap_or_default(),
                description: form.description.unwrap_or_default(),
                file: form.file,
                thumbnail: form.thumbnail,
            },
        )
        .await?;

    let view = state.workflow.view(manuscript)?;
    Ok((StatusCode::CREATED, JSend::success(view)))
}

/// Route: GET /manuscripts
pub async fn list_manuscripts(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    AppQuery(params): AppQuery<ListManuscriptsParams>,
) -> Result<Json<JSendPaginated<ManuscriptView>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let page = state.workflow.list(
        &actor,
        ListParams {
            limit: Some(params.limit),
            offset: Some(params.offset),
            status: params.status,
        },
    )?;
    Ok(JSendPaginated::page(page))
}

/// Route: GET /published-manuscripts
pub async fn list_published(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<PageParams>,
) -> Result<Json<JSendPaginated<ManuscriptView>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let page = state
        .workflow
        .list_published(Some(params.limit), Some(params.offset))?;
    Ok(JSendPaginated::page(page))
}

/// Route: GET /manuscripts/:id
pub async fn get_manuscript(
    State(state): State<Arc<AppState>>,
    MaybeActor(actor): MaybeActor,
    Path(id): Path<String>,
) -> Result<Json<JSend<ManuscriptView>>, ApiError> {
    let manuscript = state.workflow.get_visible(actor.as_ref(), &id)?;
    Ok(JSend::success(state.workflow.view(manuscript)?))
}

/// Route: PUT /manuscripts/:id
pub async fn update_manuscript(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    AppMultipart(multipart): AppMultipart,
) -> Result<Json<JSend<ManuscriptView>>, ApiError> {
    let form = read_form(multipart, state.config.max_upload_size).await?;
    if form.title.is_none()
        && form.description.is_none()
        && form.file.is_none()
        && form.thumbnail.is_none()
    {
        return Err(ApiError::bad_request(
            "at least one field (title, description, file, thumbnail) must be provided",
        ));
    }

    let manuscript = state
        .workflow
        .update(
            &actor,
            &id,
            ManuscriptPatch {
                title: form.title,
                description: form.description,
                file: form.file,
                thumbnail: form.thumbnail,
            },
        )
        .await?;
    Ok(JSend::success(state.workflow.view(manuscript)?))
}

/// Route: DELETE /manuscripts/:id
pub async fn delete_manuscript(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    state.workflow.delete(&actor, &id).await?;
    Ok(JSend::success(()))
}

/// Route: POST /manuscripts/:id/start-review
pub async fn start_review(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<JSend<ManuscriptView>>, ApiError> {
    let manuscript = state.workflow.start_review(&actor, &id)?;
    Ok(JSend::success(state.workflow.view(manuscript)?))
}

/// Route: POST /manuscripts/:id/submit-review
pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    AppJson(req): AppJson<SubmitReviewRequest>,
) -> Result<Json<JSend<ManuscriptView>>, ApiError> {
    let manuscript = state
        .workflow
        .decide(&actor, &id, &req.decision, &req.comments)?;
    Ok(JSend::success(state.workflow.view(manuscript)?))
}

// ============================================================================
// Helpers
// ============================================================================

async fn read_form(mut multipart: Multipart, max_size: u64) -> Result<ManuscriptForm, ApiError> {
    let mut form = ManuscriptForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => form.file = read_upload(field, max_size).await?,
            "thumbnail" => form.thumbnail = read_upload(field, max_size).await?,
            "title" => form.title = Some(read_text(field, "title").await?),
            "description" => form.description = Some(read_text(field, "description").await?),
            _ => {
                // Ignore unknown fields
            }
        }
    }

    Ok(form)
}

/// An empty file part (browser with no file selected) counts as absent.
async fn read_upload(field: Field<'_>, max_size: u64) -> Result<Option<Upload>, ApiError> {
    let file_name = field.file_name().unwrap_or("").to_string();
    let content_type = field.content_type().map(|s| s.to_string());

    let data = field.bytes().await.map_err(multipart_error)?;
    if data.len() as u64 > max_size {
        return Err(ApiError::payload_too_large(format!(
            "File exceeds maximum upload size of {max_size} bytes"
        )));
    }
    if data.is_empty() && file_name.is_empty() {
        return Ok(None);
    }

    Ok(Some(Upload::new(&file_name, content_type.as_deref(), data)))
}

async fn read_text(field: Field<'_>, name: &str) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid {name}: {e}")))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("Upload exceeds the maximum request size")
    } else {
        ApiError::bad_request(format!("Invalid multipart data: {e}"))
    }
}
