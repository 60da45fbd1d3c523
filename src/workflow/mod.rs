//! Manuscript lifecycle engine.
//!
//! Every status change goes through one guarded write: the transition table
//! check and the mutation run inside the same redb write transaction. Blob
//! I/O happens outside that transaction, ordered so that a failure never
//! leaves a record pointing at a blob that was not stored.

mod delivery;
mod expert_requests;

pub use delivery::{BlobStream, Delivery, DeliveryMode};
pub use expert_requests::ExpertRequestView;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{require_role, Actor};
use crate::error::ServiceError;
use crate::notify::{self, Email, Notifier};
use crate::object_store::ObjectStore;
use crate::state_machine::{attempt_transition, Action, Decision, ManuscriptStatus};
use crate::storage::models::{FileType, Manuscript, Role, Thumbnail, User};
use crate::storage::{Database, Guarded, ManuscriptFilter};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// An uploaded file part
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Upload {
    /// Keeps only the final path component of `filename`. A missing or
    /// generic content type is guessed from the filename.
    pub fn new(filename: &str, content_type: Option<&str>, data: Bytes) -> Self {
        let filename = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("upload")
            .to_string();

        let content_type = match content_type {
            Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
            _ => mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .to_string(),
        };

        Self {
            filename,
            content_type,
            data,
        }
    }

    fn file_type(&self) -> FileType {
        FileType::from_mime(&self.content_type)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewManuscript {
    pub title: String,
    pub description: String,
    pub file: Option<Upload>,
    pub thumbnail: Option<Upload>,
}

/// Partial update; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct ManuscriptPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub file: Option<Upload>,
    pub thumbnail: Option<Upload>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub status: Option<ManuscriptStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    fn slice(all: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Self {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0);
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Page {
            items,
            total,
            limit,
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// A manuscript as returned to clients, with its parties resolved
#[derive(Debug, Clone, Serialize)]
pub struct ManuscriptView {
    #[serde(flatten)]
    pub manuscript: Manuscript,
    pub author: Option<UserSummary>,
    pub reviewer: Option<UserSummary>,
}

#[derive(Clone)]
pub struct Workflow {
    db: Database,
    object_store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
    signed_url_ttl: Duration,
}

impl Workflow {
    pub fn new(
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            db,
            object_store,
            notifier,
            signed_url_ttl,
        }
    }

    // ========================================================================
    // Author operations
    // ========================================================================

    pub async fn create(
        &self,
        actor: &Actor,
        input: NewManuscript,
    ) -> Result<Manuscript, ServiceError> {
        require_role(actor, &[Role::Author])?;

        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(ServiceError::validation("Title is required"));
        }
        let file = match input.file {
            Some(file) if !file.data.is_empty() => file,
            _ => return Err(ServiceError::validation("Manuscript file is required")),
        };
        validate_document(&file)?;
        if let Some(ref thumb) = input.thumbnail {
            validate_image(thumb)?;
        }

        let file_id = uuid::Uuid::new_v4().to_string();
        let stored = self
            .object_store
            .put(&file_id, file.data.clone())
            .await
            .map_err(|e| ServiceError::storage("Failed to store manuscript file", e))?;

        let thumbnail = match input.thumbnail {
            Some(thumb) => match self.store_thumbnail(thumb).await {
                Ok(t) => Some(t),
                Err(e) => {
                    self.discard_blobs(&[file_id], "thumbnail upload failed")
                        .await;
                    return Err(e);
                }
            },
            None => None,
        };

        let now = Utc::now();
        let manuscript = Manuscript {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            description: input.description.trim().to_string(),
            file_id: stored.key,
            filename: file.filename,
            content_type: file.content_type,
            byte_size: stored.byte_size,
            thumbnail,
            author_id: actor.id.clone(),
            reviewer_id: None,
            status: ManuscriptStatus::Pending,
            reviewer_comments: String::new(),
            created_at: now,
            updated_at: now,
            submitted_at: None,
            review_started_at: None,
            reviewed_at: None,
            published_at: None,
        };

        if let Err(e) = self.db.put_manuscript(&manuscript) {
            self.discard_blobs(&manuscript.blob_keys(), "record insert failed")
                .await;
            return Err(e.into());
        }

        info!(
            manuscript_id = %manuscript.id,
            actor_id = %actor.id,
            to = %manuscript.status,
            byte_size = manuscript.byte_size,
            "Manuscript created"
        );
        Ok(manuscript)
    }

    /// Owner-only partial update while pending. New blobs are stored first;
    /// the record is only rewritten once they are safe, and superseded blobs
    /// are removed after the commit.
    pub async fn update(
        &self,
        actor: &Actor,
        id: &str,
        patch: ManuscriptPatch,
    ) -> Result<Manuscript, ServiceError> {
        require_role(actor, &[Role::Author])?;

        // Fail fast before any blob work; the guarded write re-checks
        let current = self.get_manuscript(id)?;
        attempt_transition(current.status, &Action::Edit, actor, current.parties())?;

        let title = match patch.title {
            Some(t) if t.trim().is_empty() => {
                return Err(ServiceError::validation("Title cannot be empty"))
            }
            Some(t) => Some(t.trim().to_string()),
            None => None,
        };
        if let Some(ref file) = patch.file {
            if file.data.is_empty() {
                return Err(ServiceError::validation("Manuscript file is empty"));
            }
            validate_document(file)?;
        }
        if let Some(ref thumb) = patch.thumbnail {
            validate_image(thumb)?;
        }

        let mut fresh_keys = Vec::new();
        let new_file = match patch.file {
            Some(file) => {
                let key = uuid::Uuid::new_v4().to_string();
                let stored = self
                    .object_store
                    .put(&key, file.data.clone())
                    .await
                    .map_err(|e| ServiceError::storage("Failed to store manuscript file", e))?;
                fresh_keys.push(key);
                Some((stored, file.filename, file.content_type))
            }
            None => None,
        };
        let new_thumbnail = match patch.thumbnail {
            Some(thumb) => match self.store_thumbnail(thumb).await {
                Ok(t) => {
                    fresh_keys.push(t.file_id.clone());
                    Some(t)
                }
                Err(e) => {
                    self.discard_blobs(&fresh_keys, "thumbnail upload failed")
                        .await;
                    return Err(e);
                }
            },
            None => None,
        };

        let mut superseded = Vec::new();
        let now = Utc::now();
        let outcome = self.db.modify_manuscript(id, |m| -> Result<(), ServiceError> {
            m.apply(&Action::Edit, actor, now)?;
            if let Some(title) = title {
                m.title = title;
            }
            if let Some(description) = patch.description {
                m.description = description.trim().to_string();
            }
            if let Some((stored, filename, content_type)) = new_file {
                superseded.push(std::mem::replace(&mut m.file_id, stored.key));
                m.byte_size = stored.byte_size;
                m.filename = filename;
                m.content_type = content_type;
            }
            if let Some(thumb) = new_thumbnail {
                if let Some(old) = m.thumbnail.replace(thumb) {
                    superseded.push(old.file_id);
                }
            }
            Ok(())
        });

        let result = match outcome {
            Ok(Guarded::Applied(m)) => Ok(m),
            Ok(Guarded::Rejected(e)) => Err(e),
            Ok(Guarded::Missing) => Err(ServiceError::not_found("Manuscript not found")),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(manuscript) => {
                self.discard_blobs(&superseded, "replaced by update").await;
                info!(manuscript_id = %id, actor_id = %actor.id, "Manuscript updated");
                Ok(manuscript)
            }
            Err(e) => {
                self.discard_blobs(&fresh_keys, "update rejected").await;
                Err(e)
            }
        }
    }

    /// Owner-only delete while pending. The record goes first; a blob that
    /// is already gone does not block it.
    pub async fn delete(&self, actor: &Actor, id: &str) -> Result<(), ServiceError> {
        require_role(actor, &[Role::Author])?;

        let removed = match self.db.delete_manuscript_if(id, |m| {
            attempt_transition(m.status, &Action::Delete, actor, m.parties()).map(|_| ())
        })? {
            Guarded::Applied(m) => m,
            Guarded::Rejected(e) => return Err(e.into()),
            Guarded::Missing => return Err(ServiceError::not_found("Manuscript not found")),
        };

        self.discard_blobs(&removed.blob_keys(), "manuscript deleted")
            .await;
        info!(manuscript_id = %id, actor_id = %actor.id, "Manuscript deleted");
        Ok(())
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    pub fn assign_reviewer(
        &self,
        actor: &Actor,
        id: &str,
        reviewer_id: &str,
    ) -> Result<Manuscript, ServiceError> {
        require_role(actor, &[Role::Admin])?;

        let reviewer = self
            .db
            .get_user(reviewer_id)?
            .filter(|u| u.role == Role::Expert);

        let action = Action::AssignReviewer { reviewer_id };
        let manuscript = self.transition(id, actor, |m| {
            // Status is checked before the reviewer, so a manuscript past
            // pending is a conflict whoever the reviewer is
            attempt_transition(m.status, &action, actor, m.parties())?;
            if reviewer.is_none() {
                return Err(ServiceError::validation("Invalid reviewer"));
            }
            Ok(m.apply(&action, actor, Utc::now())?)
        })?;

        if let Some(reviewer) = reviewer {
            self.notify_user(
                &reviewer.id,
                "New manuscript assigned",
                &format!(
                    "You have been assigned to review \"{}\".",
                    manuscript.title
                ),
            );
        }
        Ok(manuscript)
    }

    /// Publish an accepted manuscript, or unpublish a published one.
    pub fn toggle_publish(&self, actor: &Actor, id: &str) -> Result<Manuscript, ServiceError> {
        require_role(actor, &[Role::Admin])?;

        let manuscript = self.transition(id, actor, |m| {
            let action = Action::toggle_publish(m.status);
            Ok(m.apply(&action, actor, Utc::now())?)
        })?;

        if manuscript.status == ManuscriptStatus::Published {
            self.notify_user(
                &manuscript.author_id,
                "Your manuscript has been published",
                &format!("\"{}\" is now published.", manuscript.title),
            );
        }
        Ok(manuscript)
    }

    // ========================================================================
    // Reviewer operations
    // ========================================================================

    pub fn start_review(&self, actor: &Actor, id: &str) -> Result<Manuscript, ServiceError> {
        require_role(actor, &[Role::Expert])?;
        self.transition(id, actor, |m| {
            Ok(m.apply(&Action::StartReview, actor, Utc::now())?)
        })
    }

    pub fn decide(
        &self,
        actor: &Actor,
        id: &str,
        decision: &str,
        comments: &str,
    ) -> Result<Manuscript, ServiceError> {
        require_role(actor, &[Role::Expert])?;
        let decision: Decision = decision.parse().map_err(ServiceError::Validation)?;

        let action = Action::Decide {
            decision,
            comments: comments.trim(),
        };
        let manuscript =
            self.transition(id, actor, |m| Ok(m.apply(&action, actor, Utc::now())?))?;

        self.notify_user(
            &manuscript.author_id,
            "Your manuscript has been reviewed",
            &format!(
                "The review of \"{}\" is complete: {}.",
                manuscript.title, manuscript.status
            ),
        );
        Ok(manuscript)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Manuscripts visible to the actor's role, newest first
    pub fn list(
        &self,
        actor: &Actor,
        params: ListParams,
    ) -> Result<Page<ManuscriptView>, ServiceError> {
        let filter = match actor.role {
            Role::Admin => ManuscriptFilter::default(),
            Role::Author => ManuscriptFilter {
                author_id: Some(actor.id.as_str()),
                ..Default::default()
            },
            Role::Expert => ManuscriptFilter {
                reviewer_id: Some(actor.id.as_str()),
                ..Default::default()
            },
        };
        let filter = ManuscriptFilter {
            status: params.status,
            ..filter
        };

        let all = self.db.list_manuscripts(filter)?;
        let page = Page::slice(all, params.limit, params.offset);
        self.view_page(page)
    }

    /// Public catalogue, most recently published first
    pub fn list_published(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Page<ManuscriptView>, ServiceError> {
        let page = Page::slice(self.db.list_published()?, limit, offset);
        self.view_page(page)
    }

    pub fn view(&self, manuscript: Manuscript) -> Result<ManuscriptView, ServiceError> {
        let mut users = HashMap::new();
        self.resolve_view(manuscript, &mut users)
    }

    pub(crate) fn get_manuscript(&self, id: &str) -> Result<Manuscript, ServiceError> {
        self.db
            .get_manuscript(id)?
            .ok_or_else(|| ServiceError::not_found("Manuscript not found"))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Guarded status change. `f` runs inside the write transaction and
    /// returns the status the manuscript left.
    fn transition<F>(&self, id: &str, actor: &Actor, f: F) -> Result<Manuscript, ServiceError>
    where
        F: FnOnce(&mut Manuscript) -> Result<ManuscriptStatus, ServiceError>,
    {
        let mut from = None;
        let outcome = self.db.modify_manuscript(id, |m| -> Result<(), ServiceError> {
            from = Some(f(m)?);
            Ok(())
        })?;

        match outcome {
            Guarded::Applied(manuscript) => {
                if let Some(from) = from {
                    info!(
                        manuscript_id = %manuscript.id,
                        actor_id = %actor.id,
                        from = %from,
                        to = %manuscript.status,
                        "Manuscript transition"
                    );
                }
                Ok(manuscript)
            }
            Guarded::Rejected(e) => Err(e),
            Guarded::Missing => Err(ServiceError::not_found("Manuscript not found")),
        }
    }

    async fn store_thumbnail(&self, thumb: Upload) -> Result<Thumbnail, ServiceError> {
        let key = uuid::Uuid::new_v4().to_string();
        let stored = self
            .object_store
            .put(&key, thumb.data)
            .await
            .map_err(|e| ServiceError::storage("Failed to store thumbnail", e))?;
        Ok(Thumbnail {
            file_id: stored.key,
            content_type: thumb.content_type,
            byte_size: stored.byte_size,
        })
    }

    /// Best-effort blob removal
    async fn discard_blobs(&self, keys: &[String], reason: &str) {
        for key in keys {
            if let Err(e) = self.object_store.delete(key).await {
                warn!(key = %key, reason, error = %e, "Failed to delete blob");
            }
        }
    }

    /// Inbox entry plus email. Failures are logged only.
    pub(crate) fn notify_user(&self, user_id: &str, subject: &str, message: &str) {
        match self.db.push_notification(user_id, message) {
            Ok(true) => {}
            Ok(false) => warn!(user_id, "Notification target does not exist"),
            Err(e) => warn!(user_id, error = %e, "Failed to store notification"),
        }
        self.email_user(user_id, subject, message);
    }

    pub(crate) fn email_user(&self, user_id: &str, subject: &str, message: &str) {
        match self.db.get_user(user_id) {
            Ok(Some(user)) => notify::dispatch(&self.notifier, Email::new(user.email, subject, message)),
            Ok(None) => {}
            Err(e) => warn!(user_id, error = %e, "Failed to look up email recipient"),
        }
    }

    fn view_page(&self, page: Page<Manuscript>) -> Result<Page<ManuscriptView>, ServiceError> {
        let mut users = HashMap::new();
        let items = page
            .items
            .into_iter()
            .map(|m| self.resolve_view(m, &mut users))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    fn resolve_view(
        &self,
        manuscript: Manuscript,
        users: &mut HashMap<String, Option<UserSummary>>,
    ) -> Result<ManuscriptView, ServiceError> {
        let author = self.summary(&manuscript.author_id, users)?;
        let reviewer = match manuscript.reviewer_id {
            Some(ref id) => self.summary(id, users)?,
            None => None,
        };
        Ok(ManuscriptView {
            manuscript,
            author,
            reviewer,
        })
    }

    pub(crate) fn summary(
        &self,
        user_id: &str,
        users: &mut HashMap<String, Option<UserSummary>>,
    ) -> Result<Option<UserSummary>, ServiceError> {
        if let Some(cached) = users.get(user_id) {
            return Ok(cached.clone());
        }
        let summary = self.db.get_user(user_id)?.as_ref().map(UserSummary::from);
        users.insert(user_id.to_string(), summary.clone());
        Ok(summary)
    }
}

fn validate_document(file: &Upload) -> Result<(), ServiceError> {
    match file.file_type() {
        FileType::Document => Ok(()),
        FileType::Audio | FileType::Binary | FileType::Image | FileType::Video => {
            Err(ServiceError::validation(format!(
                "Unsupported manuscript type '{}'; upload a PDF, Word, RTF or text document",
                file.content_type
            )))
        }
    }
}

fn validate_image(file: &Upload) -> Result<(), ServiceError> {
    match file.file_type() {
        FileType::Image => Ok(()),
        FileType::Audio | FileType::Binary | FileType::Document | FileType::Video => Err(
            ServiceError::validation(format!("Thumbnail must be an image, got '{}'", file.content_type)),
        ),
    }
}
