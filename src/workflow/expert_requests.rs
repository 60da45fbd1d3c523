use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::{UserSummary, Workflow};
use crate::auth::{require_role, Actor};
use crate::error::ServiceError;
use crate::storage::models::{ExpertRequest, ExpertRequestStatus, Role};
use crate::storage::Guarded;

#[derive(Debug, Clone, Serialize)]
pub struct ExpertRequestView {
    #[serde(flatten)]
    pub request: ExpertRequest,
    pub requester: Option<UserSummary>,
}

impl Workflow {
    /// An author asks to become a reviewer. One pending request per user.
    pub fn submit_expert_request(
        &self,
        actor: &Actor,
        message: &str,
    ) -> Result<ExpertRequest, ServiceError> {
        require_role(actor, &[Role::Author])?;

        let message = message.trim();
        if message.is_empty() {
            return Err(ServiceError::validation("Message is required"));
        }

        let now = Utc::now();
        let request = ExpertRequest {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: actor.id.clone(),
            message: message.to_string(),
            status: ExpertRequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        if !self.db.create_expert_request(&request)? {
            return Err(ServiceError::conflict(
                "You already have a pending expert request",
            ));
        }

        info!(request_id = %request.id, actor_id = %actor.id, "Expert request submitted");
        self.email_user(
            &actor.id,
            "Expert request received",
            "We received your request to become a reviewer. You will be notified once it is processed.",
        );
        Ok(request)
    }

    /// Pending requests, oldest first, with their requesters
    pub fn list_pending_expert_requests(
        &self,
        actor: &Actor,
    ) -> Result<Vec<ExpertRequestView>, ServiceError> {
        require_role(actor, &[Role::Admin])?;

        let mut users = HashMap::new();
        self.db
            .list_expert_requests(Some(ExpertRequestStatus::Pending))?
            .into_iter()
            .map(|request| -> Result<ExpertRequestView, ServiceError> {
                let requester = self.summary(&request.user_id, &mut users)?;
                Ok(ExpertRequestView { request, requester })
            })
            .collect()
    }

    /// Approve a pending request and promote the requester to expert.
    pub fn approve_expert_request(
        &self,
        actor: &Actor,
        request_id: &str,
    ) -> Result<ExpertRequest, ServiceError> {
        require_role(actor, &[Role::Admin])?;
        let request = self.decide_request(request_id, ExpertRequestStatus::Approved)?;

        // Only authors are promoted; an admin or existing expert keeps their role.
        match self.db.modify_user(&request.user_id, |user| {
            if user.role != Role::Author {
                return Err(user.role);
            }
            user.role = Role::Expert;
            Ok(())
        })? {
            Guarded::Applied(_) => {}
            Guarded::Rejected(role) => {
                info!(user_id = %request.user_id, ?role, "Requester already outranks author, role kept")
            }
            Guarded::Missing => {
                warn!(user_id = %request.user_id, "Approved expert request for a missing user")
            }
        }

        info!(request_id, actor_id = %actor.id, user_id = %request.user_id, "Expert request approved");
        self.notify_user(
            &request.user_id,
            "Expert request approved",
            "Your request to become a reviewer has been approved.",
        );
        Ok(request)
    }

    pub fn reject_expert_request(
        &self,
        actor: &Actor,
        request_id: &str,
    ) -> Result<ExpertRequest, ServiceError> {
        require_role(actor, &[Role::Admin])?;
        let request = self.decide_request(request_id, ExpertRequestStatus::Rejected)?;

        info!(request_id, actor_id = %actor.id, user_id = %request.user_id, "Expert request rejected");
        self.notify_user(
            &request.user_id,
            "Expert request rejected",
            "Your request to become a reviewer has been declined.",
        );
        Ok(request)
    }

    fn decide_request(
        &self,
        request_id: &str,
        status: ExpertRequestStatus,
    ) -> Result<ExpertRequest, ServiceError> {
        match self.db.modify_expert_request(request_id, |r| {
            if r.status != ExpertRequestStatus::Pending {
                return Err(ServiceError::conflict("Request already processed"));
            }
            r.status = status;
            r.updated_at = Utc::now();
            Ok(())
        })? {
            Guarded::Applied(request) => Ok(request),
            Guarded::Rejected(e) => Err(e),
            Guarded::Missing => Err(ServiceError::not_found("Expert request not found")),
        }
    }
}
