use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::response::ApiError;
use crate::auth::Actor;
use crate::AppState;

/// The authenticated caller. Rejects with 401 when the bearer token is
/// missing or invalid.
pub struct CurrentActor(pub Actor);

/// The caller if a bearer token is present. A present but invalid token is
/// still rejected; only a missing header means anonymous.
pub struct MaybeActor(pub Option<Actor>);

fn bearer_token(parts: &Parts) -> Result<Option<&str>, ApiError> {
    let Some(value) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header"))?;
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim())),
        _ => Err(ApiError::unauthorized(
            "Authorization header must be 'Bearer <token>'",
        )),
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        let token = bearer_token(parts)?
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        let actor = state.identity.authenticate(token)?;
        Ok(CurrentActor(actor))
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        match bearer_token(parts)? {
            Some(token) => Ok(MaybeActor(Some(state.identity.authenticate(token)?))),
            None => Ok(MaybeActor(None)),
        }
    }
}
