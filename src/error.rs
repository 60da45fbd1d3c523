use thiserror::Error;

use crate::object_store::ObjectStoreError;
use crate::state_machine::TransitionError;
use crate::storage::DatabaseError;

/// Failure taxonomy shared by the workflow and identity services.
/// The API layer maps each kind to one HTTP status.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing input
    #[error("{0}")]
    Validation(String),
    /// Missing or invalid credential
    #[error("{0}")]
    Unauthenticated(String),
    /// Valid credential, wrong role or not the owner
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// Right actor, action not valid for the current status
    #[error("{0}")]
    StateConflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    /// Record exists but its blob does not
    #[error("{0}")]
    PayloadMissing(String),
    /// Blob store or delivery failure
    #[error("{0}")]
    Dependency(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ServiceError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::StateConflict(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        ServiceError::Unauthenticated(message.into())
    }

    /// Blob store failure while storing or fetching
    pub fn storage(context: &str, e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::Unsupported(msg) => {
                ServiceError::Dependency(format!("{context}: {msg}"))
            }
            other => ServiceError::Dependency(format!("{context}: {other}")),
        }
    }
}

impl From<TransitionError> for ServiceError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Forbidden(msg) => ServiceError::Forbidden(msg.to_string()),
            TransitionError::InvalidState { .. } => ServiceError::StateConflict(e.to_string()),
        }
    }
}
