//! Principals, the role gate, and credential handling.

pub mod google;
mod identity;
pub mod password;
pub mod token;

pub use identity::{FederatedProfile, IdentityService, Profile, Registration, Session};
pub use token::{Claims, TokenError, TokenService};

use crate::error::ServiceError;
use crate::storage::models::Role;

/// The identity + role pair behind an authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

/// Role gate: allow iff the actor's role is in `allowed`.
///
/// Runs before any lifecycle logic. Ownership never satisfies it.
pub fn require_role(actor: &Actor, allowed: &[Role]) -> Result<(), ServiceError> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(ServiceError::forbidden(
            "Access denied: insufficient permissions",
        ))
    }
}
