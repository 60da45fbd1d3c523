use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::extract::CurrentActor;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::auth::{require_role, Profile};
use crate::storage::models::{ExpertRequest, Role};
use crate::workflow::{ExpertRequestView, ManuscriptView};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub expert_requests_deleted: u64,
    pub manuscripts_deleted: u64,
    pub users_deleted: u64,
}

#[derive(Debug, Deserialize)]
pub struct AssignReviewerRequest {
    pub manuscript_id: String,
    pub reviewer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PublishToggleRequest {
    pub manuscript_id: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Route: DELETE /admin/purge (TEST_MODE only)
pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    require_role(&actor, &[Role::Admin])?;

    let stats = state
        .db
        .purge_all()
        .map_err(|e| ApiError::internal(e.to_string()))?;

    tracing::warn!(
        manuscripts = stats.manuscripts,
        users = stats.users,
        expert_requests = stats.expert_requests,
        "Purged all data"
    );

    Ok(JSend::success(PurgeResponse {
        expert_requests_deleted: stats.expert_requests,
        manuscripts_deleted: stats.manuscripts,
        users_deleted: stats.users,
    }))
}

/// Route: GET /admin/experts
pub async fn list_experts(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<JSend<Vec<Profile>>>, ApiError> {
    require_role(&actor, &[Role::Admin])?;
    Ok(JSend::success(state.identity.list_experts()?))
}

/// Route: POST /admin/assign-reviewer
pub async fn assign_reviewer(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    AppJson(req): AppJson<AssignReviewerRequest>,
) -> Result<Json<JSend<ManuscriptView>>, ApiError> {
    let manuscript = state
        .workflow
        .assign_reviewer(&actor, &req.manuscript_id, &req.reviewer_id)?;
    Ok(JSend::success(state.workflow.view(manuscript)?))
}

/// Route: POST /admin/publish-toggle
pub async fn publish_toggle(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    AppJson(req): AppJson<PublishToggleRequest>,
) -> Result<Json<JSend<ManuscriptView>>, ApiError> {
    let manuscript = state.workflow.toggle_publish(&actor, &req.manuscript_id)?;
    Ok(JSend::success(state.workflow.view(manuscript)?))
}

/// Route: GET /admin/expert-requests
pub async fn list_expert_requests(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<JSend<Vec<ExpertRequestView>>>, ApiError> {
    Ok(JSend::success(
        state.workflow.list_pending_expert_requests(&actor)?,
    ))
}

/// Route: POST /admin/expert-requests/:id/approve
pub async fn approve_expert_request(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<JSend<ExpertRequest>>, ApiError> {
    Ok(JSend::success(
        state.workflow.approve_expert_request(&actor, &id)?,
    ))
}

/// Route: POST /admin/expert-requests/:id/reject
pub async fn reject_expert_request(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<JSend<ExpertRequest>>, ApiError> {
    Ok(JSend::success(
        state.workflow.reject_expert_request(&actor, &id)?,
    ))
}
