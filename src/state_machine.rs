//! Manuscript status state machine.
//!
//! The full transition table lives in [`attempt_transition`]. Storage runs
//! [`Manuscript::apply`] inside the write transaction that persists the
//! result, so the status that was checked is the status that gets replaced.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Actor;
use crate::storage::models::{Manuscript, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManuscriptStatus {
    /// Submitted by the author, waiting for a reviewer
    Pending,
    /// Reviewer assigned by an admin
    Submitted,
    UnderReview,
    Accepted,
    Rejected,
    Published,
}

impl ManuscriptStatus {
    pub const ALL: [ManuscriptStatus; 6] = [
        ManuscriptStatus::Pending,
        ManuscriptStatus::Submitted,
        ManuscriptStatus::UnderReview,
        ManuscriptStatus::Accepted,
        ManuscriptStatus::Rejected,
        ManuscriptStatus::Published,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ManuscriptStatus::Pending => "pending",
            ManuscriptStatus::Submitted => "submitted",
            ManuscriptStatus::UnderReview => "under_review",
            ManuscriptStatus::Accepted => "accepted",
            ManuscriptStatus::Rejected => "rejected",
            ManuscriptStatus::Published => "published",
        }
    }
}

impl std::fmt::Display for ManuscriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManuscriptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ManuscriptStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown manuscript status '{s}'"))
    }
}

/// Reviewer verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Decision::Accepted),
            "rejected" => Ok(Decision::Rejected),
            other => Err(format!(
                "decision must be 'accepted' or 'rejected', got '{other}'"
            )),
        }
    }
}

/// Something an actor attempts to do to a manuscript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    AssignReviewer { reviewer_id: &'a str },
    StartReview,
    Decide { decision: Decision, comments: &'a str },
    Publish,
    Unpublish,
    Edit,
    Delete,
}

impl Action<'_> {
    pub fn verb(&self) -> &'static str {
        match self {
            Action::AssignReviewer { .. } => "assign a reviewer to",
            Action::StartReview => "start reviewing",
            Action::Decide { .. } => "decide on",
            Action::Publish => "publish",
            Action::Unpublish => "unpublish",
            Action::Edit => "edit",
            Action::Delete => "delete",
        }
    }

    /// The admin publish toggle: unpublish when published, publish otherwise.
    pub fn toggle_publish(current: ManuscriptStatus) -> Action<'static> {
        match current {
            ManuscriptStatus::Published => Action::Unpublish,
            _ => Action::Publish,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Wrong actor for this manuscript
    #[error("{0}")]
    Forbidden(&'static str),
    /// Right actor, wrong status
    #[error("Cannot {action} a manuscript that is {from}")]
    InvalidState {
        from: ManuscriptStatus,
        action: &'static str,
    },
}

/// The identities a manuscript is bound to
#[derive(Debug, Clone, Copy)]
pub struct Parties<'a> {
    pub author_id: &'a str,
    pub reviewer_id: Option<&'a str>,
}

/// Decide the status that `action` by `actor` leads to from `current`.
///
/// Actor checks come first: an actor who may never perform the action on this
/// manuscript gets `Forbidden` whatever the status. Only then is the status
/// checked against the table.
pub fn attempt_transition(
    current: ManuscriptStatus,
    action: &Action<'_>,
    actor: &Actor,
    parties: Parties<'_>,
) -> Result<ManuscriptStatus, TransitionError> {
    use ManuscriptStatus::*;

    match action {
        Action::AssignReviewer { .. } | Action::Publish | Action::Unpublish => match actor.role {
            Role::Admin => {}
            Role::Author | Role::Expert => {
                return Err(TransitionError::Forbidden(
                    "Only admins may assign reviewers or publish",
                ))
            }
        },
        Action::StartReview | Action::Decide { .. } => {
            if parties.reviewer_id != Some(actor.id.as_str()) {
                return Err(TransitionError::Forbidden(
                    "Not allowed to review this manuscript",
                ));
            }
        }
        Action::Edit | Action::Delete => {
            if parties.author_id != actor.id {
                return Err(TransitionError::Forbidden(
                    "Only the author may change this manuscript",
                ));
            }
        }
    }

    match (current, action) {
        (Pending, Action::AssignReviewer { .. }) => Ok(Submitted),
        (Submitted, Action::StartReview) => Ok(UnderReview),
        (
            UnderReview,
            Action::Decide {
                decision: Decision::Accepted,
                ..
            },
        ) => Ok(Accepted),
        (
            UnderReview,
            Action::Decide {
                decision: Decision::Rejected,
                ..
            },
        ) => Ok(Rejected),
        (Accepted, Action::Publish) => Ok(Published),
        (Published, Action::Unpublish) => Ok(Accepted),
        (Pending, Action::Edit | Action::Delete) => Ok(Pending),
        (from, action) => Err(TransitionError::InvalidState {
            from,
            action: action.verb(),
        }),
    }
}

impl Manuscript {
    pub fn parties(&self) -> Parties<'_> {
        Parties {
            author_id: &self.author_id,
            reviewer_id: self.reviewer_id.as_deref(),
        }
    }

    /// Run `action` through the transition table and apply its side effects.
    /// Returns the status the manuscript left. On error nothing is changed.
    pub fn apply(
        &mut self,
        action: &Action<'_>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ManuscriptStatus, TransitionError> {
        let from = self.status;
        let to = attempt_transition(from, action, actor, self.parties())?;

        match *action {
            Action::AssignReviewer { reviewer_id } => {
                self.reviewer_id = Some(reviewer_id.to_string());
                self.submitted_at = Some(now);
            }
            Action::StartReview => self.review_started_at = Some(now),
            Action::Decide { comments, .. } => {
                self.reviewer_comments = comments.to_string();
                self.reviewed_at = Some(now);
            }
            Action::Publish => self.published_at = Some(now),
            Action::Unpublish => self.published_at = None,
            Action::Edit | Action::Delete => {}
        }

        self.status = to;
        self.updated_at = now;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ManuscriptStatus::*;

    const AUTHOR: &str = "author-1";
    const REVIEWER: &str = "expert-1";

    fn actor(id: &str, role: Role) -> Actor {
        Actor {
            id: id.to_string(),
            role,
        }
    }

    fn parties() -> Parties<'static> {
        Parties {
            author_id: AUTHOR,
            reviewer_id: Some(REVIEWER),
        }
    }

    fn actions() -> Vec<Action<'static>> {
        vec![
            Action::AssignReviewer {
                reviewer_id: REVIEWER,
            },
            Action::StartReview,
            Action::Decide {
                decision: Decision::Accepted,
                comments: "",
            },
            Action::Decide {
                decision: Decision::Rejected,
                comments: "",
            },
            Action::Publish,
            Action::Unpublish,
            Action::Edit,
            Action::Delete,
        ]
    }

    /// The actor entitled to attempt each action
    fn rightful_actor(action: &Action<'_>) -> Actor {
        match action {
            Action::AssignReviewer { .. } | Action::Publish | Action::Unpublish => {
                actor("admin-1", Role::Admin)
            }
            Action::StartReview | Action::Decide { .. } => actor(REVIEWER, Role::Expert),
            Action::Edit | Action::Delete => actor(AUTHOR, Role::Author),
        }
    }

    fn expected(from: ManuscriptStatus, action: &Action<'_>) -> Option<ManuscriptStatus> {
        match (from, action) {
            (Pending, Action::AssignReviewer { .. }) => Some(Submitted),
            (Submitted, Action::StartReview) => Some(UnderReview),
            (
                UnderReview,
                Action::Decide {
                    decision: Decision::Accepted,
                    ..
                },
            ) => Some(Accepted),
            (
                UnderReview,
                Action::Decide {
                    decision: Decision::Rejected,
                    ..
                },
            ) => Some(Rejected),
            (Accepted, Action::Publish) => Some(Published),
            (Published, Action::Unpublish) => Some(Accepted),
            (Pending, Action::Edit | Action::Delete) => Some(Pending),
            _ => None,
        }
    }

    #[test]
    fn test_only_table_rows_succeed() {
        for from in ManuscriptStatus::ALL {
            for action in actions() {
                let result = attempt_transition(from, &action, &rightful_actor(&action), parties());
                match expected(from, &action) {
                    Some(to) => assert_eq!(result, Ok(to), "{from} / {action:?}"),
                    None => assert!(
                        matches!(result, Err(TransitionError::InvalidState { .. })),
                        "{from} / {action:?} should be an invalid state, got {result:?}"
                    ),
                }
            }
        }
    }

    #[test]
    fn test_non_admin_cannot_assign_or_publish() {
        for role in [Role::Author, Role::Expert] {
            let who = actor(AUTHOR, role);
            for action in [
                Action::AssignReviewer {
                    reviewer_id: REVIEWER,
                },
                Action::Publish,
                Action::Unpublish,
            ] {
                for from in ManuscriptStatus::ALL {
                    assert!(matches!(
                        attempt_transition(from, &action, &who, parties()),
                        Err(TransitionError::Forbidden(_))
                    ));
                }
            }
        }
    }

    #[test]
    fn test_unassigned_reviewer_is_forbidden_even_in_matching_status() {
        let other = actor("expert-2", Role::Expert);
        assert!(matches!(
            attempt_transition(Submitted, &Action::StartReview, &other, parties()),
            Err(TransitionError::Forbidden(_))
        ));
        assert!(matches!(
            attempt_transition(
                UnderReview,
                &Action::Decide {
                    decision: Decision::Accepted,
                    comments: "fine"
                },
                &other,
                parties()
            ),
            Err(TransitionError::Forbidden(_))
        ));
    }

    #[test]
    fn test_admin_cannot_review_on_role_alone() {
        let admin = actor("admin-1", Role::Admin);
        assert!(matches!(
            attempt_transition(Submitted, &Action::StartReview, &admin, parties()),
            Err(TransitionError::Forbidden(_))
        ));
    }

    #[test]
    fn test_non_owner_cannot_edit_pending() {
        let stranger = actor("author-2", Role::Author);
        for action in [Action::Edit, Action::Delete] {
            assert!(matches!(
                attempt_transition(Pending, &action, &stranger, parties()),
                Err(TransitionError::Forbidden(_))
            ));
        }
    }

    #[test]
    fn test_owner_cannot_edit_after_submission() {
        let owner = actor(AUTHOR, Role::Author);
        assert_eq!(
            attempt_transition(Submitted, &Action::Edit, &owner, parties()),
            Err(TransitionError::InvalidState {
                from: Submitted,
                action: "edit"
            })
        );
    }

    #[test]
    fn test_toggle_publish_picks_direction() {
        assert_eq!(Action::toggle_publish(Accepted), Action::Publish);
        assert_eq!(Action::toggle_publish(Published), Action::Unpublish);
        assert_eq!(Action::toggle_publish(Pending), Action::Publish);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in ManuscriptStatus::ALL {
            assert_eq!(status.as_str().parse::<ManuscriptStatus>(), Ok(status));
        }
        assert!("draft".parse::<ManuscriptStatus>().is_err());
        assert!("maybe".parse::<Decision>().is_err());
    }
}
