use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::extract::CurrentActor;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::notify::Email;
use crate::storage::models::{ExpertRequest, Notification};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: usize,
}

#[derive(Debug, Deserialize)]
pub struct ExpertRequestBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct InquiryRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct InquiryResponse {
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Route: GET /notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<JSend<Vec<Notification>>>, ApiError> {
    Ok(JSend::success(state.identity.notifications(&actor)?))
}

/// Route: POST /notifications/read
pub async fn mark_notifications_read(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<JSend<MarkReadResponse>>, ApiError> {
    let marked = state.identity.mark_notifications_read(&actor)?;
    Ok(JSend::success(MarkReadResponse { marked }))
}

/// Route: POST /expert-requests
pub async fn submit_expert_request(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    AppJson(req): AppJson<ExpertRequestBody>,
) -> Result<(StatusCode, Json<JSend<ExpertRequest>>), ApiError> {
    let request = state.workflow.submit_expert_request(&actor, &req.message)?;
    Ok((StatusCode::CREATED, JSend::success(request)))
}

/// Public contact form. Unlike workflow hooks, delivery is awaited: sending
/// the message is the whole point of the request.
/// Route: POST /inquiry
pub async fn send_inquiry(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<InquiryRequest>,
) -> Result<Json<JSend<InquiryResponse>>, ApiError> {
    let name = req.name.trim();
    let message = req.message.trim();
    if name.is_empty() || message.is_empty() {
        return Err(ApiError::bad_request("name and message are required"));
    }

    let recipient = state
        .config
        .notify
        .inquiry_recipient
        .as_deref()
        .ok_or_else(|| ApiError::internal("Inquiries are not configured"))?;

    let mut email = Email::new(
        recipient,
        format!("New inquiry from {name}"),
        format!("From: {name}\n\n{message}\n"),
    );
    email.reply_to = req
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    state.notifier.send(email).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to deliver inquiry");
        ApiError::internal("Failed to send inquiry")
    })?;

    Ok(JSend::success(InquiryResponse {
        message: "Inquiry sent".to_string(),
    }))
}
