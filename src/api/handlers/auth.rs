use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::extract::CurrentActor;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::auth::{Profile, Registration, Session};
use crate::AppState;

/// How long a user has to finish the Google consent screen
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Route: POST /auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<Registration>,
) -> Result<(StatusCode, Json<JSend<Session>>), ApiError> {
    let session = state.identity.register(req)?;
    Ok((StatusCode::CREATED, JSend::success(session)))
}

/// Route: POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<Json<JSend<Session>>, ApiError> {
    Ok(JSend::success(state.identity.login(&req.email, &req.password)?))
}

/// Route: GET /auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<JSend<Profile>>, ApiError> {
    Ok(JSend::success(state.identity.profile(&actor)?))
}

/// Route: POST /auth/forgot-password
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<ForgotPasswordRequest>,
) -> Result<Json<JSend<MessageResponse>>, ApiError> {
    state.identity.forgot_password(&req.email)?;
    Ok(JSend::success(MessageResponse {
        message: "If an account exists for that email, a reset link has been sent".to_string(),
    }))
}

/// Route: POST /auth/reset-password
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<ResetPasswordRequest>,
) -> Result<Json<JSend<MessageResponse>>, ApiError> {
    state.identity.reset_password(&req.token, &req.password)?;
    Ok(JSend::success(MessageResponse {
        message: "Password has been reset".to_string(),
    }))
}

/// Route: GET /auth/google
pub async fn google_start(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Google sign-in is not configured"))?;

    let oauth_state = state
        .url_signer
        .issue_state(Utc::now(), Duration::minutes(OAUTH_STATE_TTL_MINUTES));
    let url = google
        .authorize_url(&oauth_state)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Redirect::to(&url))
}

/// Route: GET /auth/google/callback
///
/// Always ends in a redirect to the web client; failures carry an `error`
/// query parameter instead of a token.
pub async fn google_callback(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<OAuthCallbackParams>,
) -> Result<Redirect, ApiError> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Google sign-in is not configured"))?;
    let frontend = state.config.node.frontend_url.trim_end_matches('/');
    let failure = |reason: &str| Redirect::to(&format!("{frontend}/login?error={reason}"));

    if let Some(error) = params.error {
        tracing::info!(error = %error, "Google sign-in cancelled or denied");
        return Ok(failure("oauth_denied"));
    }
    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return Ok(failure("oauth_invalid"));
    };
    if let Err(e) = state.url_signer.verify_state(&oauth_state, Utc::now()) {
        tracing::warn!(error = %e, "Rejected OAuth callback state");
        return Ok(failure("oauth_invalid"));
    }

    let profile = match google.exchange(&code).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(error = %e, "Google code exchange failed");
            return Ok(failure("oauth_failed"));
        }
    };

    let session = state.identity.federated_login(profile)?;
    Ok(Redirect::to(&format!(
        "{frontend}/login-success?token={}",
        session.token
    )))
}
